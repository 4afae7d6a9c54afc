//! 选择器模型
//!
//! 该模块定义标签选择器以及对端描述符。对端描述符是一个封闭的变体集合：
//! 工作负载选择器、身份作用域（命名空间）选择器和地址块列表，组合是否合法由 [`PeerDescriptor::shape`]
//! 在入口处统一校验。

use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result, ValidationError};

/// 标签选择器操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SelectorOperator {
    In,
    NotIn,
    Exists,
    #[serde(alias = "DoesNotExist")]
    NotExists,
}

impl fmt::Display for SelectorOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectorOperator::In => write!(f, "In"),
            SelectorOperator::NotIn => write!(f, "NotIn"),
            SelectorOperator::Exists => write!(f, "Exists"),
            SelectorOperator::NotExists => write!(f, "NotExists"),
        }
    }
}

impl FromStr for SelectorOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "In" => Ok(SelectorOperator::In),
            "NotIn" => Ok(SelectorOperator::NotIn),
            "Exists" => Ok(SelectorOperator::Exists),
            "NotExists" | "DoesNotExist" => Ok(SelectorOperator::NotExists),
            _ => Err(ValidationError::InvalidValue {
                field: "operator",
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// 标签选择器中的单个表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRequirement {
    pub key: String,
    pub operator: SelectorOperator,
    #[serde(default)]
    pub values: Vec<String>,
}

impl SelectorRequirement {
    pub fn new(key: &str, operator: SelectorOperator, values: &[&str]) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }
}

/// 标签选择器
///
/// `match_labels` 使用有序映射，保证同一选择器每次编译产生相同的节点顺序。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelSelector {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub match_expressions: Vec<SelectorRequirement>,
}

impl LabelSelector {
    /// 空选择器（选择全部）
    pub fn everything() -> Self {
        Self::default()
    }

    /// 添加等值标签
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.match_labels.insert(key.to_string(), value.to_string());
        self
    }

    /// 添加表达式
    pub fn with_expression(mut self, requirement: SelectorRequirement) -> Self {
        self.match_expressions.push(requirement);
        self
    }

    /// 选择器是否为空
    pub fn is_empty(&self) -> bool {
        self.match_labels.is_empty() && self.match_expressions.is_empty()
    }

    /// 按 Kubernetes 语义判断标签集合是否匹配
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let labels_match = self
            .match_labels
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v));
        if !labels_match {
            return false;
        }

        self.match_expressions.iter().all(|req| {
            let current = labels.get(&req.key);
            match req.operator {
                SelectorOperator::In => current.map_or(false, |v| req.values.contains(v)),
                SelectorOperator::NotIn => current.map_or(true, |v| !req.values.contains(v)),
                SelectorOperator::Exists => current.is_some(),
                SelectorOperator::NotExists => current.is_none(),
            }
        })
    }
}

impl TryFrom<&metav1::LabelSelector> for LabelSelector {
    type Error = Error;

    fn try_from(selector: &metav1::LabelSelector) -> Result<Self> {
        let mut match_expressions = Vec::new();
        for req in selector.match_expressions.iter().flatten() {
            match_expressions.push(SelectorRequirement {
                key: req.key.clone(),
                operator: req.operator.parse()?,
                values: req.values.clone().unwrap_or_default(),
            });
        }

        Ok(Self {
            match_labels: selector.match_labels.clone().unwrap_or_default(),
            match_expressions,
        })
    }
}

/// 工作负载类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadKind {
    #[default]
    Pod,
    VirtualMachine,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Pod => write!(f, "pod"),
            WorkloadKind::VirtualMachine => write!(f, "vm"),
        }
    }
}

/// 选择器描述符
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectorDescriptor {
    /// 工作负载标签选择器
    Workload {
        kind: WorkloadKind,
        selector: LabelSelector,
    },
    /// 身份作用域（命名空间/租户）标签选择器
    Scope(LabelSelector),
    /// 地址块列表（IP 或 CIDR）
    AddressBlocks(Vec<String>),
}

/// 校验后的对端形态
#[derive(Debug, Clone, Copy)]
pub enum SelectorShape<'a> {
    Workload(WorkloadKind, &'a LabelSelector),
    Scope(&'a LabelSelector),
    WorkloadInScope(WorkloadKind, &'a LabelSelector, &'a LabelSelector),
    AddressBlocks(&'a [String]),
}

/// 对端描述符：最多一个工作负载选择器加最多一个作用域选择器，或单独的地址块
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDescriptor {
    pub selectors: Vec<SelectorDescriptor>,
}

impl PeerDescriptor {
    pub fn new(selectors: Vec<SelectorDescriptor>) -> Self {
        Self { selectors }
    }

    pub fn pods(selector: LabelSelector) -> Self {
        Self::new(vec![SelectorDescriptor::Workload {
            kind: WorkloadKind::Pod,
            selector,
        }])
    }

    pub fn namespaces(selector: LabelSelector) -> Self {
        Self::new(vec![SelectorDescriptor::Scope(selector)])
    }

    pub fn pods_in(pods: LabelSelector, namespaces: LabelSelector) -> Self {
        Self::new(vec![
            SelectorDescriptor::Workload {
                kind: WorkloadKind::Pod,
                selector: pods,
            },
            SelectorDescriptor::Scope(namespaces),
        ])
    }

    pub fn addresses(blocks: &[&str]) -> Self {
        Self::new(vec![SelectorDescriptor::AddressBlocks(
            blocks.iter().map(|b| b.to_string()).collect(),
        )])
    }

    /// 按合法性矩阵校验描述符组合
    pub fn shape(&self) -> Result<SelectorShape<'_>> {
        let mut workload = None;
        let mut scope = None;
        let mut blocks = None;

        for descriptor in &self.selectors {
            match descriptor {
                SelectorDescriptor::Workload { kind, selector } => {
                    if workload.is_some() {
                        return Err(invalid_combination("同一对端不能包含两个工作负载选择器"));
                    }
                    workload = Some((*kind, selector));
                }
                SelectorDescriptor::Scope(selector) => {
                    if scope.is_some() {
                        return Err(invalid_combination("同一对端不能包含两个作用域选择器"));
                    }
                    scope = Some(selector);
                }
                SelectorDescriptor::AddressBlocks(list) => {
                    if blocks.is_some() {
                        return Err(invalid_combination("同一对端不能包含两个地址块列表"));
                    }
                    blocks = Some(list.as_slice());
                }
            }
        }

        match (workload, scope, blocks) {
            (Some((kind, w)), None, None) => Ok(SelectorShape::Workload(kind, w)),
            (None, Some(s), None) => Ok(SelectorShape::Scope(s)),
            (Some((kind, w)), Some(s), None) => Ok(SelectorShape::WorkloadInScope(kind, w, s)),
            (None, None, Some(list)) if !list.is_empty() => Ok(SelectorShape::AddressBlocks(list)),
            (None, None, Some(_)) => Err(invalid_combination("地址块列表不能为空")),
            (None, None, None) => Err(invalid_combination("对端描述符为空")),
            _ => Err(invalid_combination("地址块不能与标签选择器组合")),
        }
    }

    /// 是否包含非空的作用域选择器（成员可能跨出策略所属作用域）
    pub fn spans_scopes(&self) -> bool {
        self.selectors
            .iter()
            .any(|d| matches!(d, SelectorDescriptor::Scope(s) if !s.is_empty()))
    }
}

fn invalid_combination(message: &str) -> Error {
    ValidationError::InvalidSelectorCombination(message.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selector_matches() {
        let selector = LabelSelector::everything()
            .with_label("app", "web")
            .with_expression(SelectorRequirement::new(
                "tier",
                SelectorOperator::In,
                &["front", "edge"],
            ))
            .with_expression(SelectorRequirement::new("canary", SelectorOperator::NotExists, &[]));

        assert!(selector.matches(&labels(&[("app", "web"), ("tier", "edge")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("tier", "back")])));
        assert!(!selector.matches(&labels(&[("app", "web"), ("tier", "edge"), ("canary", "1")])));
        assert!(LabelSelector::everything().matches(&labels(&[])));
    }

    #[test]
    fn test_not_in_matches_missing_key() {
        let selector = LabelSelector::everything().with_expression(SelectorRequirement::new(
            "env",
            SelectorOperator::NotIn,
            &["prod"],
        ));
        assert!(selector.matches(&labels(&[])));
        assert!(!selector.matches(&labels(&[("env", "prod")])));
    }

    #[test]
    fn test_shape_matrix() {
        let pods = PeerDescriptor::pods(LabelSelector::everything());
        assert!(matches!(pods.shape().unwrap(), SelectorShape::Workload(WorkloadKind::Pod, _)));

        let combined =
            PeerDescriptor::pods_in(LabelSelector::everything(), LabelSelector::everything());
        assert!(matches!(combined.shape().unwrap(), SelectorShape::WorkloadInScope(..)));

        let two_workloads = PeerDescriptor::new(vec![
            SelectorDescriptor::Workload {
                kind: WorkloadKind::Pod,
                selector: LabelSelector::everything(),
            },
            SelectorDescriptor::Workload {
                kind: WorkloadKind::VirtualMachine,
                selector: LabelSelector::everything(),
            },
        ]);
        assert!(matches!(
            two_workloads.shape(),
            Err(Error::Validation(ValidationError::InvalidSelectorCombination(_)))
        ));

        let mut mixed = PeerDescriptor::addresses(&["10.0.0.0/24"]);
        mixed
            .selectors
            .push(SelectorDescriptor::Scope(LabelSelector::everything()));
        assert!(mixed.shape().is_err());
        assert!(PeerDescriptor::default().shape().is_err());
    }

    #[test]
    fn test_from_k8s_selector() {
        let k8s = metav1::LabelSelector {
            match_labels: Some(labels(&[("app", "db")])),
            match_expressions: Some(vec![metav1::LabelSelectorRequirement {
                key: "zone".to_string(),
                operator: "DoesNotExist".to_string(),
                values: None,
            }]),
        };
        let selector = LabelSelector::try_from(&k8s).unwrap();
        assert_eq!(selector.match_labels.get("app").map(String::as_str), Some("db"));
        assert_eq!(selector.match_expressions[0].operator, SelectorOperator::NotExists);

        let bad = metav1::LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![metav1::LabelSelectorRequirement {
                key: "zone".to_string(),
                operator: "Near".to_string(),
                values: None,
            }]),
        };
        assert!(LabelSelector::try_from(&bad).is_err());
    }
}
