//! 错误处理模块
//!
//! 该模块提供 AegisGate 的统一错误类型。校验错误是本地且确定的，必须携带实际数量与被违反的上限；
//! 命名端口无有效选项属于可恢复错误，其余错误向调用方传播。

use std::fmt;
use thiserror::Error;

/// 后端基数限制的种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// 同质条件组中的表达式数量
    CriterionExpressions,
    /// 混合条件组中的表达式数量
    MixedCriterionExpressions,
    /// 单个组内的 OR 条件组数量
    GroupCriteria,
    /// 单个组内的表达式总数
    GroupExpressions,
    /// 单个选择器中的 In 操作符数量
    InOperators,
    /// 单个 In 操作符的取值数量
    InValues,
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitKind::CriterionExpressions => write!(f, "同质条件组表达式数"),
            LimitKind::MixedCriterionExpressions => write!(f, "混合条件组表达式数"),
            LimitKind::GroupCriteria => write!(f, "组内条件组数"),
            LimitKind::GroupExpressions => write!(f, "组内表达式总数"),
            LimitKind::InOperators => write!(f, "In 操作符数"),
            LimitKind::InValues => write!(f, "In 取值数"),
        }
    }
}

/// 选择器与规则的校验错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// 超出后端基数限制
    #[error("{kind} 为 {actual}，超出上限 {limit}")]
    LimitExceeded {
        kind: LimitKind,
        actual: usize,
        limit: usize,
    },

    /// 等值标签与 In 取值重复
    #[error("重复条件: 键 {key} 的取值 {value} 同时出现在 matchLabels 与 In 表达式中")]
    DuplicateCondition { key: String, value: String },

    /// 选择器组合不合法
    #[error("选择器组合无效: {0}")]
    InvalidSelectorCombination(String),

    /// 选择器表达式不合法
    #[error("选择器表达式无效: {0}")]
    InvalidExpression(String),

    /// 字段取值不合法（方向、动作、协议、端口、地址等）
    #[error("字段 {field} 的取值无效: {value}")]
    InvalidValue { field: &'static str, value: String },

    /// 表达式结构不满足后端要求
    #[error("表达式结构无效: 长度 {len}")]
    MalformedExpression { len: usize },
}

/// AegisGate 统一错误类型
#[derive(Error, Debug)]
pub enum Error {
    /// 校验错误
    #[error("校验错误: {0}")]
    Validation(#[from] ValidationError),

    /// 命名端口没有匹配到任何运行中且有地址的工作负载
    #[error("规则 {rule} 的命名端口没有有效选项")]
    NoEffectiveOption {
        /// 失败规则的基础 ID
        rule: String,
        /// 需要清空成员的地址集组归属键
        stale_address_sets: Vec<String>,
    },

    /// 外部查询失败
    #[error("外部查询错误: {0}")]
    ExternalLookup(String),

    /// 原子发布失败
    #[error("发布错误: {0}")]
    Publish(String),

    /// JSON 错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// 构造超限错误
    pub fn limit(kind: LimitKind, actual: usize, limit: usize) -> Self {
        Error::Validation(ValidationError::LimitExceeded {
            kind,
            actual,
            limit,
        })
    }
}

/// AegisGate 结果类型别名
pub type Result<T> = std::result::Result<T, Error>;
