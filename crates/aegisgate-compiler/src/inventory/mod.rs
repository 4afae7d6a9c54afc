//! 清单查询接口
//!
//! 编译器通过这两个窄接口读取运行中的工作负载和作用域信息。查询是同步调用，
//! 超时由调用方负责限定（见 [`snapshot::InventorySnapshot::fetch`]）。

pub mod snapshot;

use aegisgate_common::{
    LabelSelector, Result, ScopeInfo, TenantContext, WorkloadInstance, WorkloadKind,
};
#[cfg(test)]
use mockall::automock;

pub use snapshot::{InventorySnapshot, ScopeRecord};

/// 工作负载查询
#[cfg_attr(test, automock)]
pub trait WorkloadLookup: Send + Sync {
    /// 列出作用域内匹配选择器的工作负载（包括未运行的实例）
    fn list_matching_workloads(
        &self,
        kind: WorkloadKind,
        selector: &LabelSelector,
        scope: &str,
    ) -> Result<Vec<WorkloadInstance>>;
}

/// 作用域目录
#[cfg_attr(test, automock)]
pub trait ScopeDirectory: Send + Sync {
    fn list_scopes_by_label(&self, selector: &LabelSelector) -> Result<Vec<ScopeInfo>>;

    /// 作用域的身份令牌，用于派生共享对象的标识
    fn resolve_scope_identity(&self, name: &str) -> Result<String>;

    fn resolve_tenant_context(&self, scope: &str) -> Result<TenantContext>;
}
