//! 部署拓扑模块
//!
//! 单作用域与多租户两种部署在 ID 前缀、成员类型、对象路径和共享决策上不同，
//! 其余编译逻辑完全一致。两种差异通过 [`Topology`] trait 的两个实现提供。

use aegisgate_common::{OwnerRef, TenantContext};

use crate::config::TopologyKind;

/// 条件成员角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberRole {
    /// 工作负载端口
    Port,
    /// 段（命名空间归属与作用域标签所在）
    Segment,
    /// 虚拟机
    VirtualMachine,
}

/// 共享层级
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingLevel {
    /// 组织范围，共享给默认项目下的全部后代
    Organization,
    /// 项目到 VPC
    Project,
}

/// 部署拓扑
pub trait Topology: Send + Sync {
    fn kind(&self) -> TopologyKind;

    /// 策略 ID 前缀方案
    fn policy_id(&self, owner: &OwnerRef, cluster: &str) -> String;

    /// 成员类型
    fn member_type(&self, role: MemberRole) -> &'static str;

    fn policy_path(&self, policy_id: &str) -> String;

    fn rule_path(&self, policy_id: &str, rule_id: &str) -> String {
        format!("{}/rules/{}", self.policy_path(policy_id), rule_id)
    }

    /// 本地组路径
    fn group_path(&self, group_id: &str) -> String;

    /// 共享决策：成员跨出所属作用域的组需要共享时返回共享层级
    fn sharing_level(&self) -> Option<SharingLevel>;

    /// 需要共享的组所在路径
    fn shared_group_path(&self, _level: SharingLevel, group_id: &str) -> String {
        self.group_path(group_id)
    }

    fn share_path(&self, level: SharingLevel, share_id: &str) -> String;

    /// 租户上下文（仅多租户拓扑）
    fn tenant(&self) -> Option<&TenantContext>;
}

/// 单作用域拓扑
#[derive(Debug, Clone)]
pub struct SingleScope {
    domain: String,
}

impl SingleScope {
    pub fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
        }
    }
}

impl Topology for SingleScope {
    fn kind(&self) -> TopologyKind {
        TopologyKind::SingleScope
    }

    fn policy_id(&self, owner: &OwnerRef, cluster: &str) -> String {
        format!("{}_{}", cluster, owner.uid)
    }

    fn member_type(&self, role: MemberRole) -> &'static str {
        match role {
            MemberRole::Port => "SegmentPort",
            MemberRole::Segment => "Segment",
            MemberRole::VirtualMachine => "VirtualMachine",
        }
    }

    fn policy_path(&self, policy_id: &str) -> String {
        format!("/infra/domains/{}/security-policies/{}", self.domain, policy_id)
    }

    fn group_path(&self, group_id: &str) -> String {
        format!("/infra/domains/{}/groups/{}", self.domain, group_id)
    }

    fn sharing_level(&self) -> Option<SharingLevel> {
        None
    }

    fn share_path(&self, _level: SharingLevel, share_id: &str) -> String {
        format!("/infra/shares/{}", share_id)
    }

    fn tenant(&self) -> Option<&TenantContext> {
        None
    }
}

/// 默认项目 ID
pub const DEFAULT_PROJECT: &str = "default";

/// 多租户拓扑
#[derive(Debug, Clone)]
pub struct MultiTenant {
    tenant: TenantContext,
}

impl MultiTenant {
    pub fn new(tenant: TenantContext) -> Self {
        Self { tenant }
    }

    /// 给定共享层级下的 infra 路径
    pub fn infra_path(&self, level: SharingLevel) -> String {
        match level {
            SharingLevel::Organization => format!("{}/infra", self.tenant.org_path()),
            SharingLevel::Project => format!("{}/infra", self.tenant.project_path()),
        }
    }
}

impl Topology for MultiTenant {
    fn kind(&self) -> TopologyKind {
        TopologyKind::MultiTenant
    }

    fn policy_id(&self, owner: &OwnerRef, _cluster: &str) -> String {
        format!("{}_{}", owner.name, owner.uid)
    }

    fn member_type(&self, role: MemberRole) -> &'static str {
        match role {
            MemberRole::Port => "VpcSubnetPort",
            MemberRole::Segment => "VpcSubnet",
            MemberRole::VirtualMachine => "VirtualMachine",
        }
    }

    fn policy_path(&self, policy_id: &str) -> String {
        format!("{}/security-policies/{}", self.tenant.vpc_path(), policy_id)
    }

    fn group_path(&self, group_id: &str) -> String {
        format!("{}/groups/{}", self.tenant.vpc_path(), group_id)
    }

    fn sharing_level(&self) -> Option<SharingLevel> {
        if self.tenant.project_id == DEFAULT_PROJECT {
            Some(SharingLevel::Organization)
        } else {
            Some(SharingLevel::Project)
        }
    }

    fn shared_group_path(&self, level: SharingLevel, group_id: &str) -> String {
        format!("{}/domains/default/groups/{}", self.infra_path(level), group_id)
    }

    fn share_path(&self, level: SharingLevel, share_id: &str) -> String {
        format!("{}/shares/{}", self.infra_path(level), share_id)
    }

    fn tenant(&self) -> Option<&TenantContext> {
        Some(&self.tenant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_scope_paths() {
        let topology = SingleScope::new("default");
        let owner = OwnerRef::new("ns1", "web", "uid-1");
        let id = topology.policy_id(&owner, "c1");
        assert_eq!(id, "c1_uid-1");
        assert_eq!(
            topology.rule_path(&id, "r1"),
            "/infra/domains/default/security-policies/c1_uid-1/rules/r1"
        );
        assert_eq!(topology.group_path("g"), "/infra/domains/default/groups/g");
        assert!(topology.sharing_level().is_none());
    }

    #[test]
    fn test_multi_tenant_paths() {
        let topology = MultiTenant::new(TenantContext::new("acme", "payments", "vpc-1"));
        assert_eq!(
            topology.group_path("g"),
            "/orgs/acme/projects/payments/vpcs/vpc-1/groups/g"
        );
        assert_eq!(topology.sharing_level(), Some(SharingLevel::Project));
        assert_eq!(
            topology.shared_group_path(SharingLevel::Project, "g"),
            "/orgs/acme/projects/payments/infra/domains/default/groups/g"
        );
        assert_eq!(topology.member_type(MemberRole::Port), "VpcSubnetPort");

        let default_project =
            MultiTenant::new(TenantContext::new("acme", DEFAULT_PROJECT, "vpc-1"));
        assert_eq!(default_project.sharing_level(), Some(SharingLevel::Organization));
        assert_eq!(
            default_project.share_path(SharingLevel::Organization, "s"),
            "/orgs/acme/infra/shares/s"
        );
    }
}
