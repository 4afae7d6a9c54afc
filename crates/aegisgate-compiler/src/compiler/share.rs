//! 跨作用域共享
//!
//! 多租户拓扑下，成员可能跨出策略所属 VPC 的组需要放到共享层级的 infra 路径，
//! 并通过共享对象授权给策略所在的项目或 VPC 引用。

use aegisgate_common::{
    BackendGroup, BackendShare, OwnerRef, PeerDescriptor, Result, SharingStrategy,
};
use tracing::debug;

use super::naming::IdentityNamer;
use crate::inventory::ScopeDirectory;
use crate::topology::{SharingLevel, Topology};

pub struct ShareBuilder<'a> {
    namer: IdentityNamer<'a>,
    topology: &'a dyn Topology,
    scopes: &'a dyn ScopeDirectory,
}

impl<'a> ShareBuilder<'a> {
    pub fn new(
        namer: IdentityNamer<'a>,
        topology: &'a dyn Topology,
        scopes: &'a dyn ScopeDirectory,
    ) -> Self {
        Self {
            namer,
            topology,
            scopes,
        }
    }

    /// 需要共享时把组移到共享路径，并返回对应的共享对象
    pub fn share_group(
        &self,
        owner: &OwnerRef,
        group: &mut BackendGroup,
        peers: &[PeerDescriptor],
    ) -> Result<Option<BackendShare>> {
        let (Some(level), Some(tenant)) = (self.topology.sharing_level(), self.topology.tenant())
        else {
            return Ok(None);
        };
        if !peers.iter().any(PeerDescriptor::spans_scopes) {
            return Ok(None);
        }

        let token = self.scopes.resolve_scope_identity(&owner.namespace)?;
        group.path = self.topology.shared_group_path(level, &group.id);

        let (shared_with, sharing_strategy) = match level {
            SharingLevel::Organization => (tenant.project_path(), SharingStrategy::AllDescendants),
            SharingLevel::Project => (tenant.vpc_path(), SharingStrategy::NoneDescendants),
        };
        let id = self.namer.share_id(&token, &group.id);
        debug!("组 {} 需要共享给 {}", group.id, shared_with);

        Ok(Some(BackendShare {
            display_name: self.namer.share_display_name(&token, &group.id),
            path: self.topology.share_path(level, &id),
            id,
            shared_with: vec![shared_with],
            sharing_strategy,
            child_resources: vec![group.path.clone()],
            tags: self.namer.policy_tags(owner),
            revision: None,
            marked_for_delete: false,
        }))
    }
}
