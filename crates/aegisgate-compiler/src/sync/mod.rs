//! 后端同步模块
//!
//! 该模块负责把编译结果与后端已发布状态对齐：差异计算、原子发布以及发布成功后的存储提交。

mod diff;
mod publisher;
mod reconciler;
mod store;

pub use diff::diff;
pub use publisher::{ApplyBatch, DryRunPublisher, Publisher};
pub use reconciler::{ObjectStores, PolicyReconciler};
pub use store::{MemoryStore, ObjectStore};
