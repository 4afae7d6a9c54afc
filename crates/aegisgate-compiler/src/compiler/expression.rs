//! 表达式构建
//!
//! 组的成员表达式以只追加的节点序列构建：每个条件组（criterion）是一个 AND 连接的嵌套表达式，
//! 多个条件组和地址表达式之间以 OR 连接。[`ExpressionArena::commit`] 在交付前校验后端结构要求：
//! 非空序列长度为奇数，偶数位置为非连接符节点，奇数位置为连接符。

use aegisgate_common::{Condition, Conjunction, ExpressionNode, Result, ValidationError};
use std::collections::BTreeSet;

/// 单个 AND 条件组
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CriterionBuilder {
    conditions: Vec<Condition>,
}

impl CriterionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn condition_count(&self) -> usize {
        self.conditions.len()
    }

    /// 条件是否引用了多种成员类型
    pub fn is_mixed(&self) -> bool {
        self.conditions
            .iter()
            .map(|c| c.member_type.as_str())
            .collect::<BTreeSet<_>>()
            .len()
            > 1
    }
}

/// 只追加的组表达式序列
#[derive(Debug, Default)]
pub struct ExpressionArena {
    nodes: Vec<ExpressionNode>,
}

impl ExpressionArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以 OR 追加一个条件组
    pub fn push_criterion(&mut self, criterion: CriterionBuilder) -> Result<()> {
        if criterion.condition_count() < 2 {
            return Err(ValidationError::MalformedExpression {
                len: criterion.condition_count(),
            }
            .into());
        }

        let mut expressions = Vec::with_capacity(criterion.condition_count() * 2 - 1);
        for (i, condition) in criterion.conditions.into_iter().enumerate() {
            if i > 0 {
                expressions.push(ExpressionNode::and());
            }
            expressions.push(ExpressionNode::Condition(condition));
        }
        self.push_top(ExpressionNode::Nested { expressions });
        Ok(())
    }

    /// 以 OR 追加一个地址表达式
    pub fn push_addresses(&mut self, ip_addresses: Vec<String>) {
        self.push_top(ExpressionNode::Addresses { ip_addresses });
    }

    fn push_top(&mut self, node: ExpressionNode) {
        if !self.nodes.is_empty() {
            self.nodes.push(ExpressionNode::or());
        }
        self.nodes.push(node);
    }

    /// 校验结构并交出节点序列
    pub fn commit(self) -> Result<Vec<ExpressionNode>> {
        check_sequence(&self.nodes, Conjunction::Or, 1)?;
        Ok(self.nodes)
    }
}

fn check_sequence(nodes: &[ExpressionNode], joiner: Conjunction, min_len: usize) -> Result<()> {
    let malformed = || ValidationError::MalformedExpression { len: nodes.len() };

    if nodes.is_empty() && min_len <= 1 {
        return Ok(());
    }
    if nodes.len() < min_len || nodes.len() % 2 == 0 {
        return Err(malformed().into());
    }

    for (position, node) in nodes.iter().enumerate() {
        match node {
            ExpressionNode::Conjunction {
                conjunction_operator,
            } => {
                if position % 2 == 0 || *conjunction_operator != joiner {
                    return Err(malformed().into());
                }
            }
            ExpressionNode::Nested { expressions } => {
                // 后端只允许一层嵌套
                if position % 2 == 1 || joiner == Conjunction::And {
                    return Err(malformed().into());
                }
                check_sequence(expressions, Conjunction::And, 3)?;
            }
            _ => {
                if position % 2 == 1 {
                    return Err(malformed().into());
                }
            }
        }
    }
    Ok(())
}
