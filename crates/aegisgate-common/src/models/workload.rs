//! 工作负载与作用域清单模型
//!
//! 外部查询接口返回的数据结构：运行中的工作负载、命名空间以及多租户上下文。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::models::intent::Protocol;
use crate::models::selector::WorkloadKind;

/// 工作负载声明的端口
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredPort {
    pub name: String,
    pub protocol: Protocol,
    pub number: u16,
}

/// 工作负载实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadInstance {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub kind: WorkloadKind,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// 尚未分配地址时为空
    #[serde(default)]
    pub address: Option<IpAddr>,
    #[serde(default)]
    pub running: bool,
    #[serde(default)]
    pub declared_ports: Vec<DeclaredPort>,
}

impl WorkloadInstance {
    /// 查找名称与协议都匹配的声明端口
    pub fn find_port(&self, name: &str, protocol: Protocol) -> Option<u16> {
        self.declared_ports
            .iter()
            .find(|p| p.name == name && p.protocol == protocol)
            .map(|p| p.number)
    }
}

/// 作用域（命名空间）信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInfo {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// 多租户上下文
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub org_id: String,
    pub project_id: String,
    pub vpc_id: String,
}

impl TenantContext {
    pub fn new(org_id: &str, project_id: &str, vpc_id: &str) -> Self {
        Self {
            org_id: org_id.to_string(),
            project_id: project_id.to_string(),
            vpc_id: vpc_id.to_string(),
        }
    }

    pub fn org_path(&self) -> String {
        format!("/orgs/{}", self.org_id)
    }

    pub fn project_path(&self) -> String {
        format!("/orgs/{}/projects/{}", self.org_id, self.project_id)
    }

    pub fn vpc_path(&self) -> String {
        format!("{}/vpcs/{}", self.project_path(), self.vpc_id)
    }
}
