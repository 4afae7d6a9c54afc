//! 标识命名
//!
//! 为每个后端对象推导确定性的 ID、显示名、标签与条件取值。所有函数都是纯函数，
//! 相同的策略内容在每一轮协调中得到相同的标识。

use aegisgate_common::{
    Direction, OwnerRef, PeerDescriptor, PortSpec, Result, RuleAction, RuleIntent, Tag,
};
use serde::Serialize;

use crate::config::NamingConfig;
use crate::topology::Topology;
use crate::utils::{short_hash, truncate_on_char_boundary};

/// 组在策略中的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupRole {
    /// 作用范围组
    AppliedTo,
    /// 源组
    Source,
    /// 目标组
    Destination,
    /// 命名端口解析出的地址集组
    AddressSet,
}

impl GroupRole {
    pub fn suffix(self) -> &'static str {
        match self {
            GroupRole::AppliedTo => "scope",
            GroupRole::Source => "src",
            GroupRole::Destination => "dst",
            GroupRole::AddressSet => "ipset",
        }
    }
}

/// 参与规则哈希的规则内容
#[derive(Serialize)]
struct RuleFingerprint<'a> {
    direction: Direction,
    action: RuleAction,
    ports: &'a [PortSpec],
    peers: &'a [PeerDescriptor],
    applied_to: &'a [PeerDescriptor],
}

/// 标识命名器
#[derive(Debug, Clone, Copy)]
pub struct IdentityNamer<'a> {
    naming: &'a NamingConfig,
    cluster: &'a str,
}

impl<'a> IdentityNamer<'a> {
    pub fn new(naming: &'a NamingConfig, cluster: &'a str) -> Self {
        Self { naming, cluster }
    }

    pub fn naming(&self) -> &'a NamingConfig {
        self.naming
    }

    /// 后端策略 ID
    pub fn policy_id(&self, topology: &dyn Topology, owner: &OwnerRef) -> String {
        self.bounded_id(&topology.policy_id(owner, self.cluster), None)
    }

    pub fn policy_display_name(&self, owner: &OwnerRef) -> String {
        self.bounded_name(&format!("{}-{}", owner.namespace, owner.name), None)
    }

    /// 规则内容哈希
    ///
    /// 对方向、动作、端口、对端与作用范围的规范 JSON 取 SHA-256 前缀，
    /// 任一字段的语义变化都会改变哈希。
    pub fn rule_hash(&self, rule: &RuleIntent) -> Result<String> {
        let fingerprint = RuleFingerprint {
            direction: rule.direction,
            action: rule.action,
            ports: &rule.ports,
            peers: &rule.peers,
            applied_to: &rule.applied_to,
        };
        let canonical = serde_json::to_string(&fingerprint)?;
        Ok(short_hash(&canonical, self.naming.hash_length))
    }

    /// 规则基础 ID：`{策略ID}_{哈希}_{序号}`
    pub fn rule_base_id(&self, policy_id: &str, hash: &str, index: usize) -> String {
        self.bounded_id(&format!("{}_{}", policy_id, hash), Some(&index.to_string()))
    }

    /// 命名端口展开后的规则 ID：基础 ID 加端口序号与地址序号
    pub fn expanded_rule_id(
        &self,
        base_id: &str,
        port_index: usize,
        address_index: usize,
    ) -> String {
        self.bounded_id(base_id, Some(&format!("{}_{}", port_index, address_index)))
    }

    pub fn rule_display_name(
        &self,
        owner: &OwnerRef,
        rule: &RuleIntent,
        index: usize,
        expansion: Option<(usize, usize)>,
    ) -> String {
        let mut base = rule
            .name
            .clone()
            .unwrap_or_else(|| format!("{}-{}", owner.name, index));
        if let Some((port_index, address_index)) = expansion {
            base = format!("{}-{}-{}", base, port_index, address_index);
        }
        let suffix = match rule.direction {
            Direction::Inbound => "ingress",
            Direction::Outbound => "egress",
        };
        self.bounded_name(&base, Some(suffix))
    }

    /// 组 ID：所属规则或策略 ID 加角色后缀
    pub fn group_id(&self, owner_id: &str, role: GroupRole) -> String {
        self.bounded_id(owner_id, Some(role.suffix()))
    }

    pub fn group_display_name(&self, base: &str, role: GroupRole) -> String {
        self.bounded_name(base, Some(role.suffix()))
    }

    /// 地址集组的归属键，同一策略内唯一标识“某条规则的某个命名端口”
    pub fn address_set_key(&self, hash: &str, index: usize, port_index: usize) -> String {
        format!("{}_{}_{}", hash, index, port_index)
    }

    pub fn share_id(&self, scope_token: &str, group_id: &str) -> String {
        self.bounded_id(&format!("{}_{}", scope_token, group_id), Some("share"))
    }

    pub fn share_display_name(&self, scope_token: &str, group_id: &str) -> String {
        self.bounded_name(&format!("{}-{}", scope_token, group_id), Some("share"))
    }

    /// 策略级标签
    pub fn policy_tags(&self, owner: &OwnerRef) -> Vec<Tag> {
        vec![
            Tag::new(&self.naming.cluster_scope, self.cluster),
            Tag::new(&self.naming.namespace_scope, &owner.namespace),
            Tag::new(&self.naming.policy_name_scope, &owner.name),
            Tag::new(&self.naming.policy_uid_scope, &owner.uid),
        ]
    }

    pub fn group_tags(&self, owner: &OwnerRef, role: GroupRole) -> Vec<Tag> {
        let mut tags = self.policy_tags(owner);
        tags.push(Tag::new(&self.naming.group_type_scope, role.suffix()));
        tags
    }

    pub fn address_set_tags(&self, owner: &OwnerRef, key: &str) -> Vec<Tag> {
        let mut tags = self.group_tags(owner, GroupRole::AddressSet);
        tags.push(Tag::new(&self.naming.address_set_scope, key));
        tags
    }

    pub fn rule_tags(&self, owner: &OwnerRef, hash: &str) -> Vec<Tag> {
        let mut tags = self.policy_tags(owner);
        tags.push(Tag::new(&self.naming.rule_hash_scope, hash));
        tags
    }

    /// 命名空间归属条件取值
    pub fn namespace_value(&self, namespace: &str) -> String {
        format!("{}|{}", self.naming.namespace_scope, namespace)
    }

    /// 集群归属条件取值
    pub fn cluster_value(&self) -> String {
        format!("{}|{}", self.naming.cluster_scope, self.cluster)
    }

    /// 仅匹配标签作用域、不限定取值的填充条件
    pub fn marker_value(&self, scope: &str) -> String {
        format!("{}|", scope)
    }

    fn bounded_id(&self, base: &str, suffix: Option<&str>) -> String {
        self.bounded(base, suffix, '_')
    }

    fn bounded_name(&self, base: &str, suffix: Option<&str>) -> String {
        self.bounded(base, suffix, '-')
    }

    /// 超长时保留前缀，追加完整取值的哈希，再原样追加后缀
    fn bounded(&self, base: &str, suffix: Option<&str>, separator: char) -> String {
        let max = self.naming.max_name_length;
        let full = match suffix {
            Some(suffix) => format!("{}{}{}", base, separator, suffix),
            None => base.to_string(),
        };
        if full.len() <= max {
            return full;
        }

        let hash = short_hash(&full, self.naming.hash_length);
        let reserved = hash.len() + 1 + suffix.map_or(0, |s| s.len() + 1);
        let prefix = truncate_on_char_boundary(base, max.saturating_sub(reserved));
        match suffix {
            Some(suffix) => format!("{}{}{}{}{}", prefix, separator, hash, separator, suffix),
            None => format!("{}{}{}", prefix, separator, hash),
        }
    }
}
