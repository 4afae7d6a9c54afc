//! 后端对象模型
//!
//! 该模块定义编译产物：安全组（含条件表达式）、防火墙规则、跨作用域共享以及承载规则的安全策略。
//! 所有对象都实现 [`BackendObject`]，协调差异计算只依赖该 trait。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 表示“任意”的引用值
pub const ANY: &str = "ANY";

/// 后端标签
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
    pub scope: String,
    pub tag: String,
}

impl Tag {
    pub fn new(scope: &str, tag: &str) -> Self {
        Self {
            scope: scope.to_string(),
            tag: tag.to_string(),
        }
    }
}

/// 条件操作符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = "EQUALS")]
    Equals,
    #[serde(rename = "NOTEQUALS")]
    NotEquals,
    #[serde(rename = "NOTIN")]
    NotIn,
}

impl fmt::Display for ConditionOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionOperator::Equals => write!(f, "EQUALS"),
            ConditionOperator::NotEquals => write!(f, "NOTEQUALS"),
            ConditionOperator::NotIn => write!(f, "NOTIN"),
        }
    }
}

/// 标签条件
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Condition {
    pub member_type: String,
    pub key: String,
    /// `scope|tag` 形式的取值
    pub value: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_operator: Option<ConditionOperator>,
}

impl Condition {
    /// 基于标签的条件
    pub fn tag(member_type: &str, value: String, operator: ConditionOperator) -> Self {
        Self {
            member_type: member_type.to_string(),
            key: "Tag".to_string(),
            value,
            operator,
            scope_operator: None,
        }
    }

    pub fn with_scope_operator(mut self, operator: ConditionOperator) -> Self {
        self.scope_operator = Some(operator);
        self
    }
}

/// 连接符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    And,
    Or,
}

/// 表达式节点
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "resource_type")]
pub enum ExpressionNode {
    Condition(Condition),
    #[serde(rename = "IPAddressExpression")]
    Addresses { ip_addresses: Vec<String> },
    #[serde(rename = "ConjunctionOperator")]
    Conjunction { conjunction_operator: Conjunction },
    #[serde(rename = "NestedExpression")]
    Nested { expressions: Vec<ExpressionNode> },
}

impl ExpressionNode {
    pub fn and() -> Self {
        ExpressionNode::Conjunction {
            conjunction_operator: Conjunction::And,
        }
    }

    pub fn or() -> Self {
        ExpressionNode::Conjunction {
            conjunction_operator: Conjunction::Or,
        }
    }

    pub fn is_conjunction(&self) -> bool {
        matches!(self, ExpressionNode::Conjunction { .. })
    }
}

/// 可被协调的后端对象
pub trait BackendObject: Clone + Send + Sync + 'static {
    /// 对象 ID
    fn id(&self) -> &str;
    /// 服务端版本号
    fn revision(&self) -> Option<i64>;
    fn set_revision(&mut self, revision: Option<i64>);
    fn marked_for_delete(&self) -> bool;
    fn set_marked_for_delete(&mut self, marked: bool);
    /// 忽略版本号与删除标记的内容比较
    fn content_eq(&self, other: &Self) -> bool;
}

macro_rules! impl_backend_object {
    ($ty:ty, [$($field:ident),+ $(,)?]) => {
        impl BackendObject for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn revision(&self) -> Option<i64> {
                self.revision
            }

            fn set_revision(&mut self, revision: Option<i64>) {
                self.revision = revision;
            }

            fn marked_for_delete(&self) -> bool {
                self.marked_for_delete
            }

            fn set_marked_for_delete(&mut self, marked: bool) {
                self.marked_for_delete = marked;
            }

            fn content_eq(&self, other: &Self) -> bool {
                self.id == other.id $(&& self.$field == other.$field)+
            }
        }
    };
}

/// 后端安全组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendGroup {
    pub id: String,
    pub display_name: String,
    pub path: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub expression: Vec<ExpressionNode>,
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default)]
    pub marked_for_delete: bool,
}

impl_backend_object!(BackendGroup, [display_name, path, tags, expression]);

impl BackendGroup {
    /// 组内的地址表达式取值
    pub fn addresses(&self) -> Vec<&str> {
        self.expression
            .iter()
            .filter_map(|node| match node {
                ExpressionNode::Addresses { ip_addresses } => Some(ip_addresses),
                _ => None,
            })
            .flatten()
            .map(String::as_str)
            .collect()
    }
}

/// 四层端口服务条目
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub id: String,
    pub l4_protocol: String,
    pub destination_ports: Vec<String>,
}

/// 后端防火墙规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendRule {
    pub id: String,
    pub display_name: String,
    pub path: String,
    pub direction: String,
    pub action: String,
    pub sequence_number: i64,
    pub services: Vec<String>,
    #[serde(default)]
    pub service_entries: Vec<ServiceEntry>,
    pub source_groups: Vec<String>,
    pub destination_groups: Vec<String>,
    pub scope: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default)]
    pub marked_for_delete: bool,
}

impl_backend_object!(
    BackendRule,
    [
        display_name,
        path,
        direction,
        action,
        sequence_number,
        services,
        service_entries,
        source_groups,
        destination_groups,
        scope,
        tags,
    ]
);

/// 共享策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SharingStrategy {
    AllDescendants,
    NoneDescendants,
}

/// 跨作用域共享
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendShare {
    pub id: String,
    pub display_name: String,
    pub path: String,
    pub shared_with: Vec<String>,
    pub sharing_strategy: SharingStrategy,
    /// 被共享资源的路径
    pub child_resources: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default)]
    pub marked_for_delete: bool,
}

impl_backend_object!(
    BackendShare,
    [display_name, path, shared_with, sharing_strategy, child_resources, tags]
);

/// 承载规则的后端安全策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendPolicy {
    pub id: String,
    pub display_name: String,
    pub path: String,
    pub sequence_number: i64,
    /// 策略级作用范围，空表示不限定
    pub scope: Vec<String>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(rename = "_revision", default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<i64>,
    #[serde(default)]
    pub marked_for_delete: bool,
}

impl_backend_object!(BackendPolicy, [display_name, path, sequence_number, scope, tags]);
