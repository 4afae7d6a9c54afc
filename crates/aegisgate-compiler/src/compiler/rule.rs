//! 规则展开
//!
//! 将一条规则意图展开为一条或多条后端规则。没有命名端口时恰好产生一条规则；
//! 含命名端口时按解析出的端口号逐一展开，多个地址合并为地址集组作为目标引用。
//!
//! 命名端口没有解析到任何运行中且有地址的工作负载时不会中止兄弟规则的展开，
//! 而是把对应的地址集归属键记入 [`RuleExpansion::unresolved`]，由调用方决定如何处理。

use aegisgate_common::{
    BackendGroup, BackendRule, BackendShare, Direction, LabelSelector, PeerDescriptor,
    PolicyIntent, PortSpec, Protocol, Result, RuleIntent, SelectorShape, ServiceEntry,
    WorkloadInstance, WorkloadKind, ANY,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use tracing::{debug, warn};

use super::expression::ExpressionArena;
use super::naming::{GroupRole, IdentityNamer};
use super::selector::SelectorCompiler;
use super::share::ShareBuilder;
use crate::inventory::{ScopeDirectory, WorkloadLookup};
use crate::topology::Topology;

/// 规则展开所需的策略级上下文
pub struct PolicyContext<'p> {
    pub intent: &'p PolicyIntent,
    pub policy_id: String,
    /// 策略级作用范围组路径
    pub applied_group_path: Option<String>,
}

/// 单条规则的展开结果
#[derive(Debug, Default)]
pub struct RuleExpansion {
    /// 规则基础 ID
    pub base_id: String,
    pub rules: Vec<BackendRule>,
    pub groups: Vec<BackendGroup>,
    pub shares: Vec<BackendShare>,
    /// 未解析命名端口的地址集归属键
    pub unresolved: Vec<String>,
}

/// 命名端口解析结果：端口号到地址集合
type NamedPortResolution = BTreeMap<u16, BTreeSet<IpAddr>>;

/// 同一条规则展开出的所有后端规则共享的字段
struct RuleDraft<'r> {
    rule: &'r RuleIntent,
    index: usize,
    hash: String,
    source: Vec<String>,
    destination: Vec<String>,
    applied: Option<Vec<String>>,
}

pub struct RuleExpander<'a> {
    namer: IdentityNamer<'a>,
    topology: &'a dyn Topology,
    selectors: SelectorCompiler<'a>,
    shares: ShareBuilder<'a>,
    workloads: &'a dyn WorkloadLookup,
    scopes: &'a dyn ScopeDirectory,
}

impl<'a> RuleExpander<'a> {
    pub fn new(
        namer: IdentityNamer<'a>,
        topology: &'a dyn Topology,
        workloads: &'a dyn WorkloadLookup,
        scopes: &'a dyn ScopeDirectory,
    ) -> Self {
        Self {
            namer,
            topology,
            selectors: SelectorCompiler::new(namer, topology),
            shares: ShareBuilder::new(namer, topology, scopes),
            workloads,
            scopes,
        }
    }

    /// 展开第 `index` 条规则
    pub fn expand(
        &self,
        rule: &RuleIntent,
        index: usize,
        ctx: &PolicyContext<'_>,
    ) -> Result<RuleExpansion> {
        let owner = &ctx.intent.owner;
        let hash = self.namer.rule_hash(rule)?;
        let base_id = self.namer.rule_base_id(&ctx.policy_id, &hash, index);
        let display_base = format!("{}-{}", owner.name, index);

        let mut expansion = RuleExpansion {
            base_id: base_id.clone(),
            ..Default::default()
        };

        // 出站规则只有命名端口时，每条后端规则的目标都来自端口解析，对端组不会被引用
        let peer_referenced = rule.direction == Direction::Inbound
            || rule.ports.iter().any(|port| !port.is_named())
            || rule.ports.is_empty();
        let peer_ref = if rule.peers.is_empty() || !peer_referenced {
            any()
        } else {
            let role = match rule.direction {
                Direction::Inbound => GroupRole::Source,
                Direction::Outbound => GroupRole::Destination,
            };
            let mut group = self.selectors.compile_group(
                owner,
                &base_id,
                &display_base,
                role,
                &rule.peers,
            )?;
            if let Some(share) = self.shares.share_group(owner, &mut group, &rule.peers)? {
                expansion.shares.push(share);
            }
            let path = vec![group.path.clone()];
            expansion.groups.push(group);
            path
        };

        let applied = if rule.applied_to.is_empty() {
            None
        } else {
            let group = self.selectors.compile_group(
                owner,
                &base_id,
                &display_base,
                GroupRole::AppliedTo,
                &rule.applied_to,
            )?;
            let path = vec![group.path.clone()];
            expansion.groups.push(group);
            Some(path)
        };

        let (source, destination) = match rule.direction {
            Direction::Inbound => (peer_ref, any()),
            Direction::Outbound => (any(), peer_ref),
        };
        let draft = RuleDraft {
            rule,
            index,
            hash,
            source,
            destination,
            applied,
        };

        if !rule.has_named_port() {
            let entries = rule
                .ports
                .iter()
                .enumerate()
                .filter_map(|(i, port)| match port {
                    PortSpec::Numeric { protocol, range } => {
                        Some(service_entry(i, *protocol, range.to_string()))
                    }
                    PortSpec::Named { .. } => None,
                })
                .collect();
            expansion
                .rules
                .push(self.emit_rule(ctx, &draft, base_id, None, entries, None));
            return Ok(expansion);
        }

        for (port_index, port) in rule.ports.iter().enumerate() {
            match port {
                PortSpec::Numeric { protocol, range } => {
                    let id = self.namer.expanded_rule_id(&base_id, port_index, 0);
                    let entries = vec![service_entry(0, *protocol, range.to_string())];
                    expansion.rules.push(self.emit_rule(
                        ctx,
                        &draft,
                        id,
                        Some((port_index, 0)),
                        entries,
                        None,
                    ));
                }
                PortSpec::Named { protocol, name } => {
                    let key = self.namer.address_set_key(&draft.hash, index, port_index);
                    let resolved = self.resolve_named_port(rule, ctx, *protocol, name)?;
                    if resolved.is_empty() {
                        warn!(
                            "规则 {} 的命名端口 {}/{} 没有有效选项",
                            base_id, protocol, name
                        );
                        expansion.unresolved.push(key);
                        continue;
                    }

                    for (address_index, (number, addresses)) in resolved.into_iter().enumerate() {
                        let id = self.namer.expanded_rule_id(&base_id, port_index, address_index);
                        let addresses: Vec<String> =
                            addresses.iter().map(ToString::to_string).collect();

                        let destination = if addresses.len() == 1 {
                            addresses
                        } else {
                            let display =
                                format!("{}-{}-{}", display_base, port_index, address_index);
                            let group =
                                self.address_set_group(ctx, &id, &display, &key, addresses)?;
                            let path = vec![group.path.clone()];
                            expansion.groups.push(group);
                            path
                        };

                        let entries = vec![service_entry(0, *protocol, number.to_string())];
                        expansion.rules.push(self.emit_rule(
                            ctx,
                            &draft,
                            id,
                            Some((port_index, address_index)),
                            entries,
                            Some(destination),
                        ));
                    }
                }
            }
        }

        debug!(
            "规则 {} 展开为 {} 条后端规则, {} 个组",
            base_id,
            expansion.rules.len(),
            expansion.groups.len()
        );
        Ok(expansion)
    }

    fn emit_rule(
        &self,
        ctx: &PolicyContext<'_>,
        draft: &RuleDraft<'_>,
        id: String,
        expansion: Option<(usize, usize)>,
        service_entries: Vec<ServiceEntry>,
        destination: Option<Vec<String>>,
    ) -> BackendRule {
        let owner = &ctx.intent.owner;
        let destination = destination.unwrap_or_else(|| draft.destination.clone());

        // 后端拒绝源、目标与作用范围全为 ANY 的规则
        let scope = match &draft.applied {
            Some(paths) => paths.clone(),
            None if is_any(&draft.source) && is_any(&destination) => ctx
                .applied_group_path
                .clone()
                .map(|path| vec![path])
                .unwrap_or_else(any),
            None => any(),
        };

        BackendRule {
            display_name: self
                .namer
                .rule_display_name(owner, draft.rule, draft.index, expansion),
            path: self.topology.rule_path(&ctx.policy_id, &id),
            id,
            direction: draft.rule.direction.to_string(),
            action: draft.rule.action.to_string(),
            sequence_number: draft.index as i64,
            services: any(),
            service_entries,
            source_groups: draft.source.clone(),
            destination_groups: destination,
            scope,
            tags: self.namer.rule_tags(owner, &draft.hash),
            revision: None,
            marked_for_delete: false,
        }
    }

    fn address_set_group(
        &self,
        ctx: &PolicyContext<'_>,
        rule_id: &str,
        display_base: &str,
        key: &str,
        addresses: Vec<String>,
    ) -> Result<BackendGroup> {
        let mut arena = ExpressionArena::new();
        arena.push_addresses(addresses);
        let id = self.namer.group_id(rule_id, GroupRole::AddressSet);

        Ok(BackendGroup {
            display_name: self
                .namer
                .group_display_name(display_base, GroupRole::AddressSet),
            path: self.topology.group_path(&id),
            id,
            tags: self.namer.address_set_tags(&ctx.intent.owner, key),
            expression: arena.commit()?,
            revision: None,
            marked_for_delete: false,
        })
    }

    /// 解析命名端口，结果按端口号合并
    fn resolve_named_port(
        &self,
        rule: &RuleIntent,
        ctx: &PolicyContext<'_>,
        protocol: Protocol,
        name: &str,
    ) -> Result<NamedPortResolution> {
        let namespace = &ctx.intent.owner.namespace;
        let targets: &[PeerDescriptor] = match rule.direction {
            Direction::Inbound if !rule.applied_to.is_empty() => &rule.applied_to,
            Direction::Inbound => &ctx.intent.applied_to,
            Direction::Outbound => &rule.peers,
        };

        let everything = LabelSelector::everything();
        let mut instances: Vec<WorkloadInstance> = Vec::new();
        if targets.is_empty() {
            instances.extend(
                self.workloads
                    .list_matching_workloads(WorkloadKind::Pod, &everything, namespace)?,
            );
        }
        for peer in targets {
            match peer.shape()? {
                SelectorShape::Workload(kind, selector) => {
                    instances.extend(
                        self.workloads
                            .list_matching_workloads(kind, selector, namespace)?,
                    );
                }
                SelectorShape::Scope(scope) => {
                    for info in self.scopes.list_scopes_by_label(scope)? {
                        instances.extend(self.workloads.list_matching_workloads(
                            WorkloadKind::Pod,
                            &everything,
                            &info.name,
                        )?);
                    }
                }
                SelectorShape::WorkloadInScope(kind, selector, scope) => {
                    for info in self.scopes.list_scopes_by_label(scope)? {
                        instances.extend(
                            self.workloads
                                .list_matching_workloads(kind, selector, &info.name)?,
                        );
                    }
                }
                SelectorShape::AddressBlocks(_) => {}
            }
        }

        let mut resolved = NamedPortResolution::new();
        for instance in instances {
            let address = match (instance.running, instance.address) {
                (true, Some(address)) => address,
                _ => {
                    warn!(
                        "跳过工作负载 {}/{}: 未运行或尚未分配地址",
                        instance.namespace, instance.name
                    );
                    continue;
                }
            };
            if let Some(number) = instance.find_port(name, protocol) {
                resolved.entry(number).or_default().insert(address);
            }
        }
        Ok(resolved)
    }
}

fn any() -> Vec<String> {
    vec![ANY.to_string()]
}

fn is_any(refs: &[String]) -> bool {
    refs.len() == 1 && refs[0] == ANY
}

fn service_entry(index: usize, protocol: Protocol, ports: String) -> ServiceEntry {
    ServiceEntry {
        id: format!("entry-{}", index),
        l4_protocol: protocol.to_string(),
        destination_ports: vec![ports],
    }
}
