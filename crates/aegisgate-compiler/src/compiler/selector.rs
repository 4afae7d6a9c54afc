//! 选择器编译
//!
//! 将对端描述符翻译为后端组的条件表达式，并统计条件组数与表达式数。
//!
//! 后端语法没有 `In` 操作符，`In` 被展开为析取：每个取值各自复制一份 AND 条件组。
//! 每个条件组最前面注入一个归属条件（命名空间或集群），工作负载标签使用工作负载成员类型，
//! 因此工作负载条件组总是混合类型，适用 15 的上限；只含作用域选择器的条件组是同质的，上限为 5。

use aegisgate_common::{
    BackendGroup, Condition, ConditionOperator, Error, LabelSelector, LimitKind, OwnerRef,
    PeerDescriptor, Result, SelectorOperator, SelectorRequirement, SelectorShape, ValidationError,
    WorkloadKind,
};
use std::net::IpAddr;
use tracing::debug;

use super::expression::{CriterionBuilder, ExpressionArena};
use super::naming::{GroupRole, IdentityNamer};
use crate::topology::{MemberRole, Topology};

/// 同质条件组的表达式上限
pub const MAX_CRITERION_EXPRESSIONS: usize = 5;
/// 混合条件组的表达式上限
pub const MAX_MIXED_CRITERION_EXPRESSIONS: usize = 15;
/// 单个组的条件组上限
pub const MAX_GROUP_CRITERIA: usize = 5;
/// 单个组的表达式总数上限
pub const MAX_GROUP_EXPRESSIONS: usize = 35;
/// 单个选择器的 In 操作符上限
pub const MAX_IN_OPERATORS: usize = 1;
/// 单个 In 操作符的取值上限
pub const MAX_IN_VALUES: usize = 5;

/// 编译计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectorCounts {
    pub criteria: usize,
    pub expressions: usize,
}

impl std::ops::AddAssign for SelectorCounts {
    fn add_assign(&mut self, other: Self) {
        self.criteria += other.criteria;
        self.expressions += other.expressions;
    }
}

/// 待展开的 In 表达式
struct InClause {
    member_type: &'static str,
    key: String,
    values: Vec<String>,
}

/// 选择器编译器
pub struct SelectorCompiler<'a> {
    namer: IdentityNamer<'a>,
    topology: &'a dyn Topology,
}

impl<'a> SelectorCompiler<'a> {
    pub fn new(namer: IdentityNamer<'a>, topology: &'a dyn Topology) -> Self {
        Self { namer, topology }
    }

    /// 编译完整的组对象，路径取拓扑的本地组路径
    pub fn compile_group(
        &self,
        owner: &OwnerRef,
        owner_id: &str,
        display_base: &str,
        role: GroupRole,
        peers: &[PeerDescriptor],
    ) -> Result<BackendGroup> {
        let mut arena = ExpressionArena::new();
        self.compile_all(peers, &owner.namespace, &mut arena)?;
        let id = self.namer.group_id(owner_id, role);

        Ok(BackendGroup {
            display_name: self.namer.group_display_name(display_base, role),
            path: self.topology.group_path(&id),
            id,
            tags: self.namer.group_tags(owner, role),
            expression: arena.commit()?,
            revision: None,
            marked_for_delete: false,
        })
    }

    /// 编译一组对端并校验组级上限
    pub fn compile_all(
        &self,
        peers: &[PeerDescriptor],
        namespace: &str,
        arena: &mut ExpressionArena,
    ) -> Result<SelectorCounts> {
        let mut total = SelectorCounts::default();
        for peer in peers {
            total += self.compile(peer, namespace, arena)?;
        }

        if total.criteria > MAX_GROUP_CRITERIA {
            return Err(Error::limit(
                LimitKind::GroupCriteria,
                total.criteria,
                MAX_GROUP_CRITERIA,
            ));
        }
        if total.expressions > MAX_GROUP_EXPRESSIONS {
            return Err(Error::limit(
                LimitKind::GroupExpressions,
                total.expressions,
                MAX_GROUP_EXPRESSIONS,
            ));
        }
        Ok(total)
    }

    /// 编译单个对端描述符，条件组追加到 `arena`
    pub fn compile(
        &self,
        peer: &PeerDescriptor,
        namespace: &str,
        arena: &mut ExpressionArena,
    ) -> Result<SelectorCounts> {
        let segment = self.topology.member_type(MemberRole::Segment);
        let naming = self.namer.naming();

        match peer.shape()? {
            SelectorShape::AddressBlocks(blocks) => {
                for block in blocks {
                    validate_block(block)?;
                }
                arena.push_addresses(blocks.to_vec());
                Ok(SelectorCounts::default())
            }
            SelectorShape::Workload(kind, selector) => {
                let mut criterion = CriterionBuilder::new();
                criterion.push(equals(segment, self.namer.namespace_value(namespace)));
                let member_type = self.workload_member_type(kind);
                let in_clause = append_selector(&mut criterion, member_type, selector)?;
                if criterion.condition_count() + usize::from(in_clause.is_some()) < 2 {
                    criterion.push(equals(member_type, self.workload_filler(kind)));
                }
                self.emit(criterion, in_clause, arena)
            }
            SelectorShape::Scope(selector) => {
                let mut criterion = CriterionBuilder::new();
                criterion.push(equals(segment, self.namer.cluster_value()));
                let in_clause = append_selector(&mut criterion, segment, selector)?;
                if criterion.condition_count() + usize::from(in_clause.is_some()) < 2 {
                    criterion.push(equals(
                        segment,
                        self.namer.marker_value(&naming.namespace_scope),
                    ));
                }
                self.emit(criterion, in_clause, arena)
            }
            SelectorShape::WorkloadInScope(kind, workload, scope) => {
                let mut criterion = CriterionBuilder::new();
                criterion.push(equals(segment, self.namer.cluster_value()));
                let member_type = self.workload_member_type(kind);
                let workload_in = append_selector(&mut criterion, member_type, workload)?;
                let scope_in = append_selector(&mut criterion, segment, scope)?;
                if scope.is_empty() {
                    criterion.push(equals(
                        segment,
                        self.namer.marker_value(&naming.namespace_scope),
                    ));
                }

                let in_clause = match (workload_in, scope_in) {
                    (Some(_), Some(_)) => {
                        return Err(Error::limit(LimitKind::InOperators, 2, MAX_IN_OPERATORS));
                    }
                    (clause, None) | (None, clause) => clause,
                };
                self.emit(criterion, in_clause, arena)
            }
        }
    }

    fn workload_member_type(&self, kind: WorkloadKind) -> &'static str {
        match kind {
            WorkloadKind::Pod => self.topology.member_type(MemberRole::Port),
            WorkloadKind::VirtualMachine => self.topology.member_type(MemberRole::VirtualMachine),
        }
    }

    fn workload_filler(&self, kind: WorkloadKind) -> String {
        let naming = self.namer.naming();
        match kind {
            WorkloadKind::Pod => self.namer.marker_value(&naming.pod_marker_scope),
            WorkloadKind::VirtualMachine => self.namer.marker_value(&naming.vm_marker_scope),
        }
    }

    /// 校验条件组上限，展开 In 后写入表达式序列
    fn emit(
        &self,
        criterion: CriterionBuilder,
        in_clause: Option<InClause>,
        arena: &mut ExpressionArena,
    ) -> Result<SelectorCounts> {
        let mut sized = criterion.clone();
        if let Some(clause) = &in_clause {
            sized.push(in_condition(clause, &clause.values[0]));
        }

        let total = sized.condition_count();
        let (kind, limit) = if sized.is_mixed() {
            (LimitKind::MixedCriterionExpressions, MAX_MIXED_CRITERION_EXPRESSIONS)
        } else {
            (LimitKind::CriterionExpressions, MAX_CRITERION_EXPRESSIONS)
        };
        if total > limit {
            return Err(Error::limit(kind, total, limit));
        }

        let counts = match in_clause {
            None => {
                arena.push_criterion(criterion)?;
                SelectorCounts {
                    criteria: 1,
                    expressions: total,
                }
            }
            Some(clause) => {
                for value in &clause.values {
                    let mut expanded = criterion.clone();
                    expanded.push(in_condition(&clause, value));
                    arena.push_criterion(expanded)?;
                }
                SelectorCounts {
                    criteria: clause.values.len(),
                    expressions: total * clause.values.len(),
                }
            }
        };

        debug!(
            "选择器编译完成: 条件组 {}, 表达式 {}",
            counts.criteria, counts.expressions
        );
        Ok(counts)
    }
}

fn equals(member_type: &str, value: String) -> Condition {
    Condition::tag(member_type, value, ConditionOperator::Equals)
}

fn in_condition(clause: &InClause, value: &str) -> Condition {
    equals(clause.member_type, format!("{}|{}", clause.key, value))
}

/// 追加一个标签选择器的等值条件与非 In 表达式，返回其 In 表达式（若有）
fn append_selector(
    criterion: &mut CriterionBuilder,
    member_type: &'static str,
    selector: &LabelSelector,
) -> Result<Option<InClause>> {
    let merged = merge_requirements(&selector.match_expressions)?;

    let in_count = merged
        .iter()
        .filter(|r| r.operator == SelectorOperator::In)
        .count();
    if in_count > MAX_IN_OPERATORS {
        return Err(Error::limit(LimitKind::InOperators, in_count, MAX_IN_OPERATORS));
    }

    for (key, value) in &selector.match_labels {
        criterion.push(equals(member_type, format!("{}|{}", key, value)));
    }

    let mut in_clause = None;
    for requirement in merged {
        match requirement.operator {
            SelectorOperator::In => {
                if requirement.values.len() > MAX_IN_VALUES {
                    return Err(Error::limit(
                        LimitKind::InValues,
                        requirement.values.len(),
                        MAX_IN_VALUES,
                    ));
                }
                if let Some(value) = selector.match_labels.get(&requirement.key) {
                    if requirement.values.contains(value) {
                        return Err(ValidationError::DuplicateCondition {
                            key: requirement.key,
                            value: value.clone(),
                        }
                        .into());
                    }
                }
                in_clause = Some(InClause {
                    member_type,
                    key: requirement.key,
                    values: requirement.values,
                });
            }
            SelectorOperator::NotIn => criterion.push(Condition::tag(
                member_type,
                format!("{}|{}", requirement.key, requirement.values.join(",")),
                ConditionOperator::NotIn,
            )),
            SelectorOperator::Exists => {
                criterion.push(equals(member_type, format!("{}|", requirement.key)))
            }
            SelectorOperator::NotExists => criterion.push(
                equals(member_type, format!("{}|", requirement.key))
                    .with_scope_operator(ConditionOperator::NotEquals),
            ),
        }
    }
    Ok(in_clause)
}

/// 合并相同 (操作符, 键) 的表达式，取值按首次出现顺序去重
pub fn merge_requirements(
    requirements: &[SelectorRequirement],
) -> Result<Vec<SelectorRequirement>> {
    let mut merged: Vec<SelectorRequirement> = Vec::new();

    for requirement in requirements {
        validate_requirement(requirement)?;

        let position = merged
            .iter()
            .position(|m| m.operator == requirement.operator && m.key == requirement.key);
        let index = match position {
            Some(index) => index,
            None => {
                merged.push(SelectorRequirement {
                    key: requirement.key.clone(),
                    operator: requirement.operator,
                    values: Vec::new(),
                });
                merged.len() - 1
            }
        };
        let target = &mut merged[index];
        for value in &requirement.values {
            if !target.values.contains(value) {
                target.values.push(value.clone());
            }
        }
    }
    Ok(merged)
}

fn validate_requirement(requirement: &SelectorRequirement) -> Result<()> {
    if requirement.key.is_empty() {
        return Err(ValidationError::InvalidExpression("表达式键不能为空".to_string()).into());
    }

    let needs_values = matches!(
        requirement.operator,
        SelectorOperator::In | SelectorOperator::NotIn
    );
    if needs_values == requirement.values.is_empty() {
        return Err(ValidationError::InvalidExpression(format!(
            "键 {} 的操作符 {} 与取值数量 {} 不匹配",
            requirement.key,
            requirement.operator,
            requirement.values.len()
        ))
        .into());
    }
    Ok(())
}

/// 校验 IP 地址或 CIDR
fn validate_block(block: &str) -> Result<()> {
    let invalid = || ValidationError::InvalidValue {
        field: "ipBlock",
        value: block.to_string(),
    };

    let (address, prefix) = match block.split_once('/') {
        Some((address, prefix)) => (address, Some(prefix)),
        None => (block, None),
    };
    let ip: IpAddr = address.parse().map_err(|_| invalid())?;
    if let Some(prefix) = prefix {
        let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid().into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamingConfig;
    use crate::topology::SingleScope;
    use aegisgate_common::ExpressionNode;
    use rstest::rstest;

    fn compile(peer: &PeerDescriptor) -> Result<(SelectorCounts, Vec<ExpressionNode>)> {
        let naming = NamingConfig::default();
        let topology = SingleScope::new("default");
        let compiler = SelectorCompiler::new(IdentityNamer::new(&naming, "c1"), &topology);
        let mut arena = ExpressionArena::new();
        let counts = compiler.compile_all(std::slice::from_ref(peer), "ns1", &mut arena)?;
        Ok((counts, arena.commit()?))
    }

    fn nested(node: &ExpressionNode) -> &[ExpressionNode] {
        match node {
            ExpressionNode::Nested { expressions } => expressions,
            other => panic!("expected nested node, got {:?}", other),
        }
    }

    fn condition(node: &ExpressionNode) -> &Condition {
        match node {
            ExpressionNode::Condition(c) => c,
            other => panic!("expected condition, got {:?}", other),
        }
    }

    fn labels(n: usize) -> LabelSelector {
        (0..n).fold(LabelSelector::everything(), |s, i| {
            s.with_label(&format!("k{}", i), "v")
        })
    }

    #[test]
    fn test_in_expands_to_disjunction() {
        let selector = LabelSelector::everything().with_expression(SelectorRequirement::new(
            "k1",
            SelectorOperator::In,
            &["a1", "a2"],
        ));
        let (counts, nodes) = compile(&PeerDescriptor::namespaces(selector)).unwrap();
        assert_eq!(
            counts,
            SelectorCounts {
                criteria: 2,
                expressions: 4
            }
        );
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[1], ExpressionNode::or());

        let first = nested(&nodes[0]);
        assert_eq!(condition(&first[0]).value, "aegisgate/cluster|c1");
        assert_eq!(condition(&first[2]).value, "k1|a1");
        assert_eq!(condition(&nested(&nodes[2])[2]).value, "k1|a2");
    }

    fn not_in(key: &str, value: &str) -> SelectorRequirement {
        SelectorRequirement::new(key, SelectorOperator::NotIn, &[value])
    }

    fn exists(key: &str) -> SelectorRequirement {
        SelectorRequirement::new(key, SelectorOperator::Exists, &[])
    }

    #[rstest]
    #[case::scope_at_cap(PeerDescriptor::namespaces(labels(4)), true)]
    #[case::scope_over_cap(PeerDescriptor::namespaces(labels(5)), false)]
    #[case::pod_at_cap(PeerDescriptor::pods(labels(14)), true)]
    #[case::pod_over_cap(PeerDescriptor::pods(labels(15)), false)]
    #[case::scope_expressions_at_cap(
        PeerDescriptor::namespaces(labels(3).with_expression(not_in("env", "dev"))),
        true
    )]
    #[case::scope_expressions_over_cap(
        PeerDescriptor::namespaces(
            labels(3)
                .with_expression(not_in("env", "dev"))
                .with_expression(exists("team")),
        ),
        false
    )]
    #[case::scope_merged_expressions_count_once(
        PeerDescriptor::namespaces(
            labels(3)
                .with_expression(not_in("env", "dev"))
                .with_expression(not_in("env", "qa")),
        ),
        true
    )]
    #[case::pod_expressions_over_cap(
        PeerDescriptor::pods(
            labels(12)
                .with_expression(not_in("env", "dev"))
                .with_expression(exists("team"))
                .with_expression(exists("zone")),
        ),
        false
    )]
    #[case::pair_at_cap(PeerDescriptor::pods_in(labels(7), labels(7)), true)]
    #[case::pair_over_cap(
        PeerDescriptor::pods_in(labels(7).with_expression(exists("team")), labels(7)),
        false
    )]
    fn test_criterion_caps(#[case] peer: PeerDescriptor, #[case] ok: bool) {
        let result = compile(&peer);
        assert_eq!(result.is_ok(), ok, "{:?}", result.err());
    }

    #[test]
    fn test_cap_error_reports_counts() {
        let err = compile(&PeerDescriptor::namespaces(labels(5))).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::CriterionExpressions,
                actual: 6,
                limit: 5,
            })
        ));

        let err = compile(&PeerDescriptor::pods_in(
            labels(7),
            labels(7).with_expression(exists("team")),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::MixedCriterionExpressions,
                actual: 16,
                limit: 15,
            })
        ));

        let err = compile(&PeerDescriptor::pods(labels(15))).unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::MixedCriterionExpressions,
                actual: 16,
                limit: 15,
            })
        ));
    }

    #[test]
    fn test_in_constraints() {
        let two_ins = LabelSelector::everything()
            .with_expression(SelectorRequirement::new("a", SelectorOperator::In, &["1"]))
            .with_expression(SelectorRequirement::new("b", SelectorOperator::In, &["2"]));
        assert!(matches!(
            compile(&PeerDescriptor::pods(two_ins)),
            Err(Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::InOperators,
                ..
            }))
        ));

        let too_many = LabelSelector::everything().with_expression(SelectorRequirement::new(
            "a",
            SelectorOperator::In,
            &["1", "2", "3", "4", "5", "6"],
        ));
        assert!(matches!(
            compile(&PeerDescriptor::pods(too_many)),
            Err(Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::InValues,
                actual: 6,
                limit: 5,
            }))
        ));

        let duplicate = LabelSelector::everything()
            .with_label("app", "web")
            .with_expression(SelectorRequirement::new(
                "app",
                SelectorOperator::In,
                &["web", "db"],
            ));
        assert!(matches!(
            compile(&PeerDescriptor::pods(duplicate)),
            Err(Error::Validation(ValidationError::DuplicateCondition { .. }))
        ));
    }

    #[test]
    fn test_one_in_across_combined_pair() {
        let pods = LabelSelector::everything()
            .with_expression(SelectorRequirement::new("app", SelectorOperator::In, &["a"]));
        let namespaces = LabelSelector::everything()
            .with_expression(SelectorRequirement::new("env", SelectorOperator::In, &["prod"]));
        assert!(compile(&PeerDescriptor::pods_in(pods.clone(), namespaces)).is_err());
        assert!(compile(&PeerDescriptor::pods_in(pods, LabelSelector::everything())).is_ok());
    }

    #[test]
    fn test_merge_unions_same_key_and_operator() {
        let selector = LabelSelector::everything()
            .with_expression(SelectorRequirement::new(
                "env",
                SelectorOperator::NotIn,
                &["dev", "qa"],
            ))
            .with_expression(SelectorRequirement::new(
                "env",
                SelectorOperator::NotIn,
                &["qa", "test"],
            ));
        let (counts, nodes) = compile(&PeerDescriptor::pods(selector)).unwrap();
        assert_eq!(
            counts,
            SelectorCounts {
                criteria: 1,
                expressions: 2
            }
        );

        let not_in = condition(&nested(&nodes[0])[2]);
        assert_eq!(not_in.value, "env|dev,qa,test");
        assert_eq!(not_in.operator, ConditionOperator::NotIn);
    }

    #[test]
    fn test_exists_operators() {
        let selector = LabelSelector::everything()
            .with_expression(SelectorRequirement::new("a", SelectorOperator::Exists, &[]))
            .with_expression(SelectorRequirement::new("b", SelectorOperator::NotExists, &[]));
        let (_, nodes) = compile(&PeerDescriptor::pods(selector)).unwrap();
        let criterion = nested(&nodes[0]);

        let exists = condition(&criterion[2]);
        assert_eq!(exists.value, "a|");
        assert_eq!(exists.scope_operator, None);

        let not_exists = condition(&criterion[4]);
        assert_eq!(not_exists.value, "b|");
        assert_eq!(not_exists.scope_operator, Some(ConditionOperator::NotEquals));

        let bad = LabelSelector::everything()
            .with_expression(SelectorRequirement::new("a", SelectorOperator::Exists, &["x"]));
        assert!(compile(&PeerDescriptor::pods(bad)).is_err());
    }

    #[test]
    fn test_empty_selectors_get_fillers() {
        let (counts, nodes) = compile(&PeerDescriptor::pods(LabelSelector::everything())).unwrap();
        assert_eq!(counts.expressions, 2);
        let criterion = nested(&nodes[0]);
        assert_eq!(condition(&criterion[0]).value, "aegisgate/namespace|ns1");
        assert_eq!(condition(&criterion[2]).value, "aegisgate/pod|");
        assert_eq!(condition(&criterion[2]).member_type, "SegmentPort");

        let combined = PeerDescriptor::pods_in(
            LabelSelector::everything().with_label("app", "web"),
            LabelSelector::everything(),
        );
        let (counts, nodes) = compile(&combined).unwrap();
        assert_eq!(counts.expressions, 3);
        assert_eq!(condition(&nested(&nodes[0])[4]).value, "aegisgate/namespace|");
    }

    #[test]
    fn test_counts_ignore_label_order() {
        let forward = LabelSelector::everything().with_label("a", "1").with_label("b", "2");
        let reverse = LabelSelector::everything().with_label("b", "2").with_label("a", "1");
        assert_eq!(
            compile(&PeerDescriptor::pods(forward)).unwrap(),
            compile(&PeerDescriptor::pods(reverse)).unwrap()
        );
    }

    #[test]
    fn test_address_blocks() {
        let (counts, nodes) =
            compile(&PeerDescriptor::addresses(&["10.0.0.0/24", "fd00::1"])).unwrap();
        assert_eq!(counts, SelectorCounts::default());
        assert!(matches!(
            &nodes[0],
            ExpressionNode::Addresses { ip_addresses } if ip_addresses.len() == 2
        ));

        assert!(compile(&PeerDescriptor::addresses(&["10.0.0.0/33"])).is_err());
        assert!(compile(&PeerDescriptor::addresses(&["not-an-ip"])).is_err());
    }

    #[test]
    fn test_group_caps() {
        let naming = NamingConfig::default();
        let topology = SingleScope::new("default");
        let compiler = SelectorCompiler::new(IdentityNamer::new(&naming, "c1"), &topology);

        let wide = LabelSelector::everything().with_expression(SelectorRequirement::new(
            "tier",
            SelectorOperator::In,
            &["a", "b", "c"],
        ));
        let peers = vec![PeerDescriptor::pods(wide.clone()), PeerDescriptor::pods(wide)];
        let err = compiler
            .compile_all(&peers, "ns1", &mut ExpressionArena::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::GroupCriteria,
                actual: 6,
                limit: 5,
            })
        ));

        let heavy = labels(7).with_expression(SelectorRequirement::new(
            "tier",
            SelectorOperator::In,
            &["a", "b", "c", "d", "e"],
        ));
        let err = compiler
            .compile_all(&[PeerDescriptor::pods(heavy)], "ns1", &mut ExpressionArena::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::LimitExceeded {
                kind: LimitKind::GroupExpressions,
                actual: 45,
                limit: 35,
            })
        ));
    }
}
