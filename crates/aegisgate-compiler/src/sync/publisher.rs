//! 原子发布
//!
//! 一次协调产生的全部创建、更新与软删除以一个批次发布。

use aegisgate_common::{
    BackendGroup, BackendObject, BackendPolicy, BackendRule, BackendShare, OwnerRef, Result,
};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

/// 一次原子发布的对象批次
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyBatch {
    pub owner: OwnerRef,
    pub policies: Vec<BackendPolicy>,
    pub groups: Vec<BackendGroup>,
    pub rules: Vec<BackendRule>,
    pub shares: Vec<BackendShare>,
}

impl ApplyBatch {
    pub fn new(owner: OwnerRef) -> Self {
        Self {
            owner,
            policies: Vec::new(),
            groups: Vec::new(),
            rules: Vec::new(),
            shares: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.policies.len() + self.groups.len() + self.rules.len() + self.shares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 批次中带删除标记的对象数
    pub fn deletions(&self) -> usize {
        count_deleted(&self.policies)
            + count_deleted(&self.groups)
            + count_deleted(&self.rules)
            + count_deleted(&self.shares)
    }
}

fn count_deleted<T: BackendObject>(objects: &[T]) -> usize {
    objects.iter().filter(|o| o.marked_for_delete()).count()
}

/// 后端发布接口
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Publisher: Send + Sync {
    /// 原子地发布整个批次；失败时后端不应用其中任何对象
    async fn publish(&self, batch: &ApplyBatch) -> Result<()>;
}

/// 只记录批次、不访问后端的发布器
#[derive(Default)]
pub struct DryRunPublisher {
    batches: Mutex<Vec<ApplyBatch>>,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录的批次
    pub async fn batches(&self) -> Vec<ApplyBatch> {
        self.batches.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn publish(&self, batch: &ApplyBatch) -> Result<()> {
        info!(
            "[dry-run] 所有者 {}: 策略 {}, 组 {}, 规则 {}, 共享 {}, 其中删除 {}",
            batch.owner,
            batch.policies.len(),
            batch.groups.len(),
            batch.rules.len(),
            batch.shares.len(),
            batch.deletions()
        );
        self.batches.lock().await.push(batch.clone());
        Ok(())
    }
}
