//! 策略编译模块
//!
//! 该模块把一条策略意图编译为后端期望对象集合：策略本身、作用范围组、每条规则展开出的规则与组，
//! 以及多租户拓扑下的共享对象。编译是纯计算，除清单查询外没有副作用。

pub mod expression;
pub mod naming;
pub mod rule;
pub mod selector;
pub mod share;

use aegisgate_common::{
    BackendGroup, BackendPolicy, BackendRule, BackendShare, Error, OwnerRef, PolicyIntent, Result,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CompilerConfig, NamingConfig, TopologyKind};
use crate::inventory::{ScopeDirectory, WorkloadLookup};
use crate::topology::{MultiTenant, SingleScope, Topology};

pub use naming::{GroupRole, IdentityNamer};
pub use rule::{PolicyContext, RuleExpander, RuleExpansion};
pub use selector::{SelectorCompiler, SelectorCounts};
pub use share::ShareBuilder;

/// 一条策略的期望对象集合
#[derive(Debug, Clone, Serialize)]
pub struct CompiledPolicy {
    pub owner: OwnerRef,
    pub policy: BackendPolicy,
    pub groups: Vec<BackendGroup>,
    pub rules: Vec<BackendRule>,
    pub shares: Vec<BackendShare>,
    /// 部分命名端口未解析时需要清空成员（而不是删除）的地址集归属键
    pub cleared_address_sets: Vec<String>,
}

/// 策略编译器
pub struct PolicyCompiler {
    cluster: String,
    topology: TopologyKind,
    domain: String,
    naming: NamingConfig,
    workloads: Arc<dyn WorkloadLookup>,
    scopes: Arc<dyn ScopeDirectory>,
}

impl PolicyCompiler {
    pub fn new(
        config: &CompilerConfig,
        workloads: Arc<dyn WorkloadLookup>,
        scopes: Arc<dyn ScopeDirectory>,
    ) -> Self {
        Self {
            cluster: config.cluster.clone(),
            topology: config.topology,
            domain: config.domain.clone(),
            naming: config.naming(),
            workloads,
            scopes,
        }
    }

    pub fn naming(&self) -> &NamingConfig {
        &self.naming
    }

    /// 策略所属的拓扑；多租户拓扑需要先解析命名空间的租户上下文
    fn topology_for(&self, owner: &OwnerRef) -> Result<Box<dyn Topology>> {
        Ok(match self.topology {
            TopologyKind::SingleScope => Box::new(SingleScope::new(&self.domain)),
            TopologyKind::MultiTenant => {
                let tenant = self.scopes.resolve_tenant_context(&owner.namespace)?;
                Box::new(MultiTenant::new(tenant))
            }
        })
    }

    /// 编译一条策略
    ///
    /// 某条规则展开后一条后端规则都没有时返回 [`Error::NoEffectiveOption`]，
    /// 其中包含所有规则中未解析的地址集归属键；其余规则照常展开，不会被提前中止。
    pub fn compile(&self, intent: &PolicyIntent) -> Result<CompiledPolicy> {
        let owner = &intent.owner;
        let topology = self.topology_for(owner)?;
        let topology = topology.as_ref();
        debug!("以 {:?} 拓扑编译策略 {}", topology.kind(), owner);
        let namer = IdentityNamer::new(&self.naming, &self.cluster);
        let selectors = SelectorCompiler::new(namer, topology);

        let policy_id = namer.policy_id(topology, owner);
        let mut groups = Vec::new();

        let applied_group_path = if intent.applied_to.is_empty() {
            None
        } else {
            let group = selectors.compile_group(
                owner,
                &policy_id,
                &owner.name,
                GroupRole::AppliedTo,
                &intent.applied_to,
            )?;
            let path = group.path.clone();
            groups.push(group);
            Some(path)
        };

        let policy = BackendPolicy {
            display_name: namer.policy_display_name(owner),
            path: topology.policy_path(&policy_id),
            id: policy_id.clone(),
            sequence_number: i64::from(intent.priority),
            scope: applied_group_path.iter().cloned().collect(),
            tags: namer.policy_tags(owner),
            revision: None,
            marked_for_delete: false,
        };

        let ctx = PolicyContext {
            intent,
            policy_id,
            applied_group_path,
        };
        let expander = RuleExpander::new(
            namer,
            topology,
            self.workloads.as_ref(),
            self.scopes.as_ref(),
        );

        let mut rules = Vec::new();
        let mut shares = Vec::new();
        let mut unresolved = Vec::new();
        let mut ineffective = None;

        for (index, rule) in intent.rules.iter().enumerate() {
            let expansion = expander.expand(rule, index, &ctx)?;
            if expansion.rules.is_empty() && ineffective.is_none() {
                ineffective = Some(expansion.base_id.clone());
            }
            rules.extend(expansion.rules);
            groups.extend(expansion.groups);
            shares.extend(expansion.shares);
            unresolved.extend(expansion.unresolved);
        }

        if let Some(rule) = ineffective {
            warn!("策略 {} 的规则 {} 没有可用的展开结果", owner, rule);
            return Err(Error::NoEffectiveOption {
                rule,
                stale_address_sets: unresolved,
            });
        }

        debug!(
            "策略 {} 编译结果: {} 条规则, {} 个组, {} 个共享",
            owner,
            rules.len(),
            groups.len(),
            shares.len()
        );
        info!("策略 {} 编译完成", owner);

        Ok(CompiledPolicy {
            owner: owner.clone(),
            policy,
            groups,
            rules,
            shares,
            cleared_address_sets: unresolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InventorySnapshot, ScopeRecord};
    use aegisgate_common::{
        DeclaredPort, Direction, LabelSelector, PeerDescriptor, PortSpec, Protocol, RuleAction,
        RuleIntent, SharingStrategy, WorkloadInstance, WorkloadKind,
    };

    fn snapshot() -> Arc<InventorySnapshot> {
        let mut db = WorkloadInstance {
            name: "db-0".to_string(),
            namespace: "ns1".to_string(),
            kind: WorkloadKind::Pod,
            labels: [("app".to_string(), "db".to_string())].into(),
            address: Some("10.0.1.7".parse().unwrap()),
            running: true,
            declared_ports: vec![DeclaredPort {
                name: "sql".to_string(),
                protocol: Protocol::TCP,
                number: 5432,
            }],
        };
        let mut replica = db.clone();
        replica.name = "db-1".to_string();
        replica.address = Some("10.0.1.8".parse().unwrap());
        db.labels.insert("role".to_string(), "primary".to_string());

        Arc::new(InventorySnapshot {
            workloads: vec![db, replica],
            scopes: vec![ScopeRecord {
                name: "ns1".to_string(),
                uid: Some("ns1-uid".to_string()),
                vpc: Some("vpc-1".to_string()),
                project: Some("payments".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    fn compiler(topology: TopologyKind) -> PolicyCompiler {
        let config = CompilerConfig {
            cluster: "c1".to_string(),
            topology,
            ..Default::default()
        };
        let inventory = snapshot();
        PolicyCompiler::new(&config, inventory.clone(), inventory)
    }

    fn intent() -> PolicyIntent {
        PolicyIntent::new(OwnerRef::new("ns1", "web", "uid-1"), 10)
            .with_applied_to(PeerDescriptor::pods(
                LabelSelector::everything().with_label("app", "web"),
            ))
            .with_rule(
                RuleIntent::new(Direction::Inbound, RuleAction::Allow)
                    .with_port(PortSpec::tcp(443))
                    .with_peer(PeerDescriptor::pods(
                        LabelSelector::everything().with_label("app", "lb"),
                    )),
            )
            .with_rule(
                RuleIntent::new(Direction::Outbound, RuleAction::Allow)
                    .with_port(PortSpec::named(Protocol::TCP, "sql"))
                    .with_peer(PeerDescriptor::pods(
                        LabelSelector::everything().with_label("app", "db"),
                    )),
            )
    }

    #[test]
    fn test_compile_single_scope() {
        let compiled = compiler(TopologyKind::SingleScope).compile(&intent()).unwrap();

        assert_eq!(compiled.policy.id, "c1_uid-1");
        assert_eq!(compiled.policy.sequence_number, 10);
        assert_eq!(
            compiled.policy.scope,
            vec!["/infra/domains/default/groups/c1_uid-1_scope"]
        );
        assert_eq!(compiled.rules.len(), 2);
        // 作用范围组、入站源组、地址集组；只有命名端口的出站规则不生成目标组
        assert_eq!(compiled.groups.len(), 3);
        assert!(!compiled.groups.iter().any(|g| g.id.ends_with("_dst")));
        assert!(compiled.shares.is_empty());
        assert!(compiled.cleared_address_sets.is_empty());

        let sql = &compiled.rules[1];
        assert_eq!(sql.service_entries[0].destination_ports, vec!["5432"]);
        let ipset = compiled.groups.iter().find(|g| g.id.ends_with("_ipset")).unwrap();
        assert_eq!(ipset.addresses(), vec!["10.0.1.7", "10.0.1.8"]);
        assert_eq!(sql.destination_groups, vec![ipset.path.clone()]);
    }

    #[test]
    fn test_compile_is_deterministic() {
        let compiler = compiler(TopologyKind::SingleScope);
        let first = compiler.compile(&intent()).unwrap();
        let second = compiler.compile(&intent()).unwrap();
        assert_eq!(first.rules, second.rules);
        assert_eq!(first.groups, second.groups);
    }

    #[test]
    fn test_empty_applied_to_is_unscoped() {
        let intent = PolicyIntent::new(OwnerRef::new("ns1", "open", "uid-2"), 1)
            .with_rule(RuleIntent::new(Direction::Inbound, RuleAction::Allow));
        let compiled = compiler(TopologyKind::SingleScope).compile(&intent).unwrap();
        assert!(compiled.policy.scope.is_empty());
        assert_eq!(compiled.rules[0].scope, vec![aegisgate_common::ANY]);
    }

    #[test]
    fn test_no_effective_option() {
        let intent = intent().with_rule(
            RuleIntent::new(Direction::Outbound, RuleAction::Allow)
                .with_port(PortSpec::named(Protocol::TCP, "missing"))
                .with_peer(PeerDescriptor::pods(LabelSelector::everything())),
        );
        match compiler(TopologyKind::SingleScope).compile(&intent) {
            Err(Error::NoEffectiveOption {
                rule,
                stale_address_sets,
            }) => {
                assert!(rule.ends_with("_2"));
                assert_eq!(stale_address_sets.len(), 1);
            }
            other => panic!("unexpected result {:?}", other.map(|c| c.policy.id)),
        }
    }

    #[test]
    fn test_compile_multi_tenant_with_share() {
        let intent = PolicyIntent::new(OwnerRef::new("ns1", "web", "uid-1"), 10).with_rule(
            RuleIntent::new(Direction::Inbound, RuleAction::Allow).with_peer(
                PeerDescriptor::pods_in(
                    LabelSelector::everything(),
                    LabelSelector::everything().with_label("team", "billing"),
                ),
            ),
        );
        let compiled = compiler(TopologyKind::MultiTenant).compile(&intent).unwrap();

        assert_eq!(compiled.policy.id, "web_uid-1");
        assert_eq!(
            compiled.policy.path,
            "/orgs/default/projects/payments/vpcs/vpc-1/security-policies/web_uid-1"
        );
        assert_eq!(compiled.shares.len(), 1);
        let share = &compiled.shares[0];
        assert_eq!(share.sharing_strategy, SharingStrategy::NoneDescendants);
        assert_eq!(share.child_resources, vec![compiled.groups[0].path.clone()]);
        assert!(compiled.groups[0]
            .path
            .starts_with("/orgs/default/projects/payments/infra/"));
        assert_eq!(compiled.groups[0].expression.len(), 1);
    }

    #[test]
    fn test_multi_tenant_requires_tenant() {
        let intent = PolicyIntent::new(OwnerRef::new("unknown", "web", "uid-1"), 10);
        assert!(matches!(
            compiler(TopologyKind::MultiTenant).compile(&intent),
            Err(Error::ExternalLookup(_))
        ));
    }
}
