//! 策略意图模型
//!
//! 该模块定义编译器的输入：策略意图及其有序规则列表。规则在列表中的位置决定其序号，
//! 同时参与后端对象 ID 的推导。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result, ValidationError};
use crate::models::selector::PeerDescriptor;

/// 规则动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleAction {
    /// 允许通信
    Allow,
    /// 丢弃数据包
    Drop,
    /// 拒绝并回送响应
    Reject,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAction::Allow => write!(f, "ALLOW"),
            RuleAction::Drop => write!(f, "DROP"),
            RuleAction::Reject => write!(f, "REJECT"),
        }
    }
}

impl FromStr for RuleAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(RuleAction::Allow),
            "drop" => Ok(RuleAction::Drop),
            "reject" => Ok(RuleAction::Reject),
            _ => Err(ValidationError::InvalidValue {
                field: "action",
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// 规则方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// 入站
    Inbound,
    /// 出站
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "IN"),
            Direction::Outbound => write!(f, "OUT"),
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "in" | "inbound" | "ingress" => Ok(Direction::Inbound),
            "out" | "outbound" | "egress" => Ok(Direction::Outbound),
            _ => Err(ValidationError::InvalidValue {
                field: "direction",
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// 协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Protocol {
    TCP,
    UDP,
    SCTP,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::TCP => write!(f, "TCP"),
            Protocol::UDP => write!(f, "UDP"),
            Protocol::SCTP => write!(f, "SCTP"),
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tcp" => Ok(Protocol::TCP),
            "udp" => Ok(Protocol::UDP),
            "sctp" => Ok(Protocol::SCTP),
            _ => Err(ValidationError::InvalidValue {
                field: "protocol",
                value: s.to_string(),
            }
            .into()),
        }
    }
}

/// 端口范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// 起始端口
    pub from: u16,
    /// 结束端口
    pub to: u16,
}

impl PortRange {
    /// 创建新的端口范围
    pub fn new(from: u16, to: u16) -> Result<Self> {
        if from == 0 || from > to {
            return Err(ValidationError::InvalidValue {
                field: "port",
                value: format!("{}-{}", from, to),
            }
            .into());
        }

        Ok(Self { from, to })
    }

    /// 创建单一端口的范围
    pub fn single(port: u16) -> Self {
        Self {
            from: port,
            to: port,
        }
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from == self.to {
            write!(f, "{}", self.from)
        } else {
            write!(f, "{}-{}", self.from, self.to)
        }
    }
}

/// 规则端口：数字范围或命名端口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PortSpec {
    Numeric {
        protocol: Protocol,
        range: PortRange,
    },
    Named { protocol: Protocol, name: String },
}

impl PortSpec {
    pub fn tcp(port: u16) -> Self {
        PortSpec::Numeric {
            protocol: Protocol::TCP,
            range: PortRange::single(port),
        }
    }

    pub fn named(protocol: Protocol, name: &str) -> Self {
        PortSpec::Named {
            protocol,
            name: name.to_string(),
        }
    }

    pub fn is_named(&self) -> bool {
        matches!(self, PortSpec::Named { .. })
    }
}

/// 策略所有者身份
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl OwnerRef {
    pub fn new(namespace: &str, name: &str, uid: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            uid: uid.to_string(),
        }
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// 规则意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleIntent {
    /// 规则名称（仅用于显示名）
    #[serde(default)]
    pub name: Option<String>,
    pub direction: Direction,
    pub action: RuleAction,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// 入站时为源，出站时为目标
    #[serde(default)]
    pub peers: Vec<PeerDescriptor>,
    /// 规则级作用范围，覆盖策略级作用范围
    #[serde(default)]
    pub applied_to: Vec<PeerDescriptor>,
}

impl RuleIntent {
    pub fn new(direction: Direction, action: RuleAction) -> Self {
        Self {
            name: None,
            direction,
            action,
            ports: Vec::new(),
            peers: Vec::new(),
            applied_to: Vec::new(),
        }
    }

    pub fn with_port(mut self, port: PortSpec) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_peer(mut self, peer: PeerDescriptor) -> Self {
        self.peers.push(peer);
        self
    }

    pub fn with_applied_to(mut self, target: PeerDescriptor) -> Self {
        self.applied_to.push(target);
        self
    }

    pub fn has_named_port(&self) -> bool {
        self.ports.iter().any(PortSpec::is_named)
    }
}

/// 策略意图
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyIntent {
    pub owner: OwnerRef,
    /// 策略优先级，映射为后端策略序号
    pub priority: i32,
    #[serde(default)]
    pub applied_to: Vec<PeerDescriptor>,
    #[serde(default)]
    pub rules: Vec<RuleIntent>,
}

impl PolicyIntent {
    pub fn new(owner: OwnerRef, priority: i32) -> Self {
        Self {
            owner,
            priority,
            applied_to: Vec::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_applied_to(mut self, target: PeerDescriptor) -> Self {
        self.applied_to.push(target);
        self
    }

    pub fn with_rule(mut self, rule: RuleIntent) -> Self {
        self.rules.push(rule);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("ingress", Direction::Inbound)]
    #[case("IN", Direction::Inbound)]
    #[case("egress", Direction::Outbound)]
    #[case("Outbound", Direction::Outbound)]
    fn test_direction_parse(#[case] input: &str, #[case] expected: Direction) {
        assert_eq!(input.parse::<Direction>().unwrap(), expected);
    }

    #[test]
    fn test_invalid_action() {
        assert!(matches!(
            "deny".parse::<RuleAction>(),
            Err(Error::Validation(ValidationError::InvalidValue { field: "action", .. }))
        ));
    }

    #[test]
    fn test_port_range() {
        assert!(PortRange::new(90, 80).is_err());
        assert!(PortRange::new(0, 10).is_err());
        assert_eq!(PortRange::new(80, 90).unwrap().to_string(), "80-90");
        assert_eq!(PortRange::single(443).to_string(), "443");
    }
}
