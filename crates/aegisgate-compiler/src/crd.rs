//! 自定义资源定义模块
//!
//! 该模块定义 AegisGate 的 `ZeroTrustPolicy` 自定义资源，并负责把资源规范校验后转换为编译器输入
//! [`PolicyIntent`]。方向、动作、协议与端口的非法取值在转换时即被拒绝。

use aegisgate_common::{
    Direction, Error, LabelSelector, OwnerRef, PeerDescriptor, PolicyIntent, PortRange, PortSpec,
    Protocol, Result, RuleAction, RuleIntent, SelectorDescriptor, ValidationError, WorkloadKind,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{CustomResource, ResourceExt};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// 零信任策略规范
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[kube(
    group = "aegisgate.io",
    version = "v1alpha1",
    kind = "ZeroTrustPolicy",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ZeroTrustPolicySpec {
    /// 策略优先级，映射为后端策略序号
    #[serde(default = "default_priority")]
    pub priority: i32,

    /// 策略作用范围；为空时策略不限定范围
    #[serde(default)]
    pub applied_to: Vec<PolicyTarget>,

    /// 有序规则列表
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// 选择器目标：工作负载选择器加可选的命名空间选择器，或单独的地址块
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTarget {
    pub pod_selector: Option<metav1::LabelSelector>,
    pub vm_selector: Option<metav1::LabelSelector>,
    pub namespace_selector: Option<metav1::LabelSelector>,
    #[serde(default)]
    pub ip_blocks: Vec<String>,
}

/// 策略规则
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub name: Option<String>,

    /// Ingress（入站）或 Egress（出站）
    pub direction: String,

    /// Allow、Drop 或 Reject
    pub action: String,

    #[serde(default)]
    pub ports: Vec<PolicyPort>,

    /// 入站规则的源
    #[serde(default)]
    pub sources: Vec<PolicyTarget>,

    /// 出站规则的目标
    #[serde(default)]
    pub destinations: Vec<PolicyTarget>,

    /// 规则级作用范围
    #[serde(default)]
    pub applied_to: Vec<PolicyTarget>,
}

/// 端口定义
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyPort {
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// 端口号或命名端口；缺省表示全部端口
    pub port: Option<IntOrString>,

    /// 端口范围结束（仅数字端口）
    pub end_port: Option<i32>,
}

/// 默认优先级
fn default_priority() -> i32 {
    1000
}

/// 默认协议
fn default_protocol() -> String {
    "TCP".to_string()
}

impl ZeroTrustPolicy {
    /// 校验并转换为策略意图
    pub fn to_intent(&self) -> Result<PolicyIntent> {
        let namespace = self.namespace().ok_or_else(|| invalid("namespace", ""))?;
        let name = self.name_any();
        let uid = self
            .uid()
            .unwrap_or_else(|| format!("{}-{}", namespace, name));

        let mut intent =
            PolicyIntent::new(OwnerRef::new(&namespace, &name, &uid), self.spec.priority);
        intent.applied_to = convert_targets(&self.spec.applied_to)?;

        for (index, rule) in self.spec.rules.iter().enumerate() {
            let converted = convert_rule(rule).map_err(|e| {
                debug!("策略 {}/{} 的第 {} 条规则无效: {}", namespace, name, index, e);
                e
            })?;
            intent.rules.push(converted);
        }

        Ok(intent)
    }
}

fn convert_rule(rule: &PolicyRule) -> Result<RuleIntent> {
    let direction: Direction = rule.direction.parse()?;
    let action: RuleAction = rule.action.parse()?;

    let (peers, wrong_side, field) = match direction {
        Direction::Inbound => (&rule.sources, &rule.destinations, "destinations"),
        Direction::Outbound => (&rule.destinations, &rule.sources, "sources"),
    };
    if !wrong_side.is_empty() {
        return Err(invalid(field, &format!("{} 规则不能设置 {}", direction, field)));
    }

    let mut intent = RuleIntent::new(direction, action);
    intent.name = rule.name.clone();
    intent.peers = convert_targets(peers)?;
    intent.applied_to = convert_targets(&rule.applied_to)?;
    intent.ports = rule
        .ports
        .iter()
        .map(convert_port)
        .collect::<Result<Vec<_>>>()?;
    Ok(intent)
}

fn convert_port(port: &PolicyPort) -> Result<PortSpec> {
    let protocol: Protocol = port.protocol.parse()?;

    match &port.port {
        Some(IntOrString::String(name)) => {
            if port.end_port.is_some() {
                return Err(invalid("endPort", name));
            }
            if name.is_empty() {
                return Err(invalid("port", name));
            }
            Ok(PortSpec::named(protocol, name))
        }
        Some(IntOrString::Int(from)) => {
            let from = port_number(*from)?;
            let to = match port.end_port {
                Some(end) => port_number(end)?,
                None => from,
            };
            Ok(PortSpec::Numeric {
                protocol,
                range: PortRange::new(from, to)?,
            })
        }
        None => {
            if let Some(end) = port.end_port {
                return Err(invalid("endPort", &end.to_string()));
            }
            Ok(PortSpec::Numeric {
                protocol,
                range: PortRange::new(1, u16::MAX)?,
            })
        }
    }
}

fn port_number(value: i32) -> Result<u16> {
    u16::try_from(value)
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| invalid("port", &value.to_string()))
}

fn convert_targets(targets: &[PolicyTarget]) -> Result<Vec<PeerDescriptor>> {
    targets.iter().map(convert_target).collect()
}

fn convert_target(target: &PolicyTarget) -> Result<PeerDescriptor> {
    let mut selectors = Vec::new();

    if let Some(selector) = &target.pod_selector {
        selectors.push(SelectorDescriptor::Workload {
            kind: WorkloadKind::Pod,
            selector: LabelSelector::try_from(selector)?,
        });
    }
    if let Some(selector) = &target.vm_selector {
        selectors.push(SelectorDescriptor::Workload {
            kind: WorkloadKind::VirtualMachine,
            selector: LabelSelector::try_from(selector)?,
        });
    }
    if let Some(selector) = &target.namespace_selector {
        selectors.push(SelectorDescriptor::Scope(LabelSelector::try_from(selector)?));
    }
    if !target.ip_blocks.is_empty() {
        selectors.push(SelectorDescriptor::AddressBlocks(target.ip_blocks.clone()));
    }

    let peer = PeerDescriptor::new(selectors);
    peer.shape()?;
    Ok(peer)
}

fn invalid(field: &'static str, value: &str) -> Error {
    ValidationError::InvalidValue {
        field,
        value: value.to_string(),
    }
    .into()
}
