//! 清单快照
//!
//! 从 Kubernetes `Pod` 与 `Namespace` 对象构建的内存清单，实现 [`WorkloadLookup`] 与
//! [`ScopeDirectory`]。快照在一次协调开始前拉取，编译期间的查询不再访问 API 服务器。

use aegisgate_common::{
    DeclaredPort, Error, LabelSelector, Protocol, Result, ScopeInfo, TenantContext,
    WorkloadInstance, WorkloadKind,
};
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ScopeDirectory, WorkloadLookup};
use crate::config::TenantDefaults;

/// 命名空间上声明组织的注解
pub const ORG_ANNOTATION: &str = "aegisgate.io/org";
/// 命名空间上声明项目的注解
pub const PROJECT_ANNOTATION: &str = "aegisgate.io/project";
/// 命名空间上声明 VPC 的注解
pub const VPC_ANNOTATION: &str = "aegisgate.io/vpc";

/// 作用域记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeRecord {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub vpc: Option<String>,
}

/// 内存清单快照
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySnapshot {
    #[serde(default)]
    pub workloads: Vec<WorkloadInstance>,
    #[serde(default)]
    pub scopes: Vec<ScopeRecord>,
    /// 由配置提供，不从清单文件读取
    #[serde(skip)]
    pub tenant_defaults: TenantDefaults,
}

impl InventorySnapshot {
    /// 在给定超时内从集群拉取快照
    pub async fn fetch(
        client: Client,
        timeout: Duration,
        defaults: TenantDefaults,
    ) -> Result<Self> {
        let load = async {
            let pods: Api<Pod> = Api::all(client.clone());
            let namespaces: Api<Namespace> = Api::all(client);

            let pods = pods
                .list(&ListParams::default())
                .await
                .map_err(|e| Error::ExternalLookup(format!("列出 Pod 失败: {}", e)))?;
            let namespaces = namespaces
                .list(&ListParams::default())
                .await
                .map_err(|e| Error::ExternalLookup(format!("列出命名空间失败: {}", e)))?;

            Ok::<_, Error>(Self::from_k8s(&pods.items, &namespaces.items, defaults))
        };

        let snapshot = tokio::time::timeout(timeout, load)
            .await
            .map_err(|_| Error::ExternalLookup(format!("清单查询超时 ({:?})", timeout)))??;

        info!(
            "清单快照已加载: {} 个工作负载, {} 个命名空间",
            snapshot.workloads.len(),
            snapshot.scopes.len()
        );
        Ok(snapshot)
    }

    pub fn with_tenant_defaults(mut self, defaults: TenantDefaults) -> Self {
        self.tenant_defaults = defaults;
        self
    }

    /// 从 Kubernetes 对象构建快照
    pub fn from_k8s(
        pods: &[Pod],
        namespaces: &[Namespace],
        tenant_defaults: TenantDefaults,
    ) -> Self {
        Self {
            workloads: pods.iter().filter_map(workload_from_pod).collect(),
            scopes: namespaces.iter().map(scope_from_namespace).collect(),
            tenant_defaults,
        }
    }

    fn scope(&self, name: &str) -> Result<&ScopeRecord> {
        self.scopes
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::ExternalLookup(format!("命名空间 {} 不存在", name)))
    }
}

fn workload_from_pod(pod: &Pod) -> Option<WorkloadInstance> {
    let namespace = pod.namespace()?;
    let status = pod.status.as_ref();

    let address = status
        .and_then(|s| s.pod_ip.as_deref())
        .and_then(|ip| match ip.parse() {
            Ok(address) => Some(address),
            Err(_) => {
                warn!("Pod {}/{} 的地址 {} 无法解析", namespace, pod.name_any(), ip);
                None
            }
        });
    let running = status.and_then(|s| s.phase.as_deref()) == Some("Running");

    let mut declared_ports = Vec::new();
    for container in pod.spec.iter().flat_map(|spec| spec.containers.iter()) {
        for port in container.ports.iter().flatten() {
            let Some(name) = port.name.clone() else {
                continue;
            };
            let protocol = match port.protocol.as_deref() {
                Some(p) => match p.parse::<Protocol>() {
                    Ok(protocol) => protocol,
                    Err(_) => continue,
                },
                None => Protocol::TCP,
            };
            let Ok(number) = u16::try_from(port.container_port) else {
                continue;
            };
            declared_ports.push(DeclaredPort {
                name,
                protocol,
                number,
            });
        }
    }

    Some(WorkloadInstance {
        name: pod.name_any(),
        namespace,
        kind: WorkloadKind::Pod,
        labels: pod.labels().clone(),
        address,
        running,
        declared_ports,
    })
}

fn scope_from_namespace(namespace: &Namespace) -> ScopeRecord {
    let annotation = |key: &str| namespace.annotations().get(key).cloned();
    ScopeRecord {
        name: namespace.name_any(),
        labels: namespace.labels().clone(),
        uid: namespace.uid(),
        org: annotation(ORG_ANNOTATION),
        project: annotation(PROJECT_ANNOTATION),
        vpc: annotation(VPC_ANNOTATION),
    }
}

impl WorkloadLookup for InventorySnapshot {
    fn list_matching_workloads(
        &self,
        kind: WorkloadKind,
        selector: &LabelSelector,
        scope: &str,
    ) -> Result<Vec<WorkloadInstance>> {
        let matched: Vec<_> = self
            .workloads
            .iter()
            .filter(|w| w.kind == kind && w.namespace == scope && selector.matches(&w.labels))
            .cloned()
            .collect();
        debug!("作用域 {} 中匹配到 {} 个 {} 工作负载", scope, matched.len(), kind);
        Ok(matched)
    }
}

impl ScopeDirectory for InventorySnapshot {
    fn list_scopes_by_label(&self, selector: &LabelSelector) -> Result<Vec<ScopeInfo>> {
        Ok(self
            .scopes
            .iter()
            .filter(|s| selector.matches(&s.labels))
            .map(|s| ScopeInfo {
                name: s.name.clone(),
                labels: s.labels.clone(),
            })
            .collect())
    }

    fn resolve_scope_identity(&self, name: &str) -> Result<String> {
        let scope = self.scope(name)?;
        Ok(scope.uid.clone().unwrap_or_else(|| scope.name.clone()))
    }

    fn resolve_tenant_context(&self, scope: &str) -> Result<TenantContext> {
        let record = self.scope(scope)?;
        let vpc = record
            .vpc
            .as_deref()
            .ok_or_else(|| Error::ExternalLookup(format!("命名空间 {} 未声明 VPC", scope)))?;
        Ok(TenantContext::new(
            record.org.as_deref().unwrap_or(&self.tenant_defaults.org_id),
            record.project.as_deref().unwrap_or(&self.tenant_defaults.project_id),
            vpc,
        ))
    }
}
