//! 策略协调器
//!
//! 每条策略的协调流程：编译期望对象，与存储中的已发布对象做差异计算，原子发布应用集合，
//! 发布成功后提交到存储。多条策略可以并发协调，它们只共享按所有者划分的存储。

use aegisgate_common::{
    BackendGroup, BackendPolicy, BackendRule, BackendShare, Error, OwnerRef, PolicyIntent, Result,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::diff::diff;
use super::publisher::{ApplyBatch, Publisher};
use super::store::{MemoryStore, ObjectStore};
use crate::compiler::PolicyCompiler;

/// 各类后端对象的存储
#[derive(Clone)]
pub struct ObjectStores {
    pub policies: Arc<dyn ObjectStore<BackendPolicy>>,
    pub groups: Arc<dyn ObjectStore<BackendGroup>>,
    pub rules: Arc<dyn ObjectStore<BackendRule>>,
    pub shares: Arc<dyn ObjectStore<BackendShare>>,
}

impl ObjectStores {
    pub fn in_memory() -> Self {
        Self {
            policies: Arc::new(MemoryStore::new()),
            groups: Arc::new(MemoryStore::new()),
            rules: Arc::new(MemoryStore::new()),
            shares: Arc::new(MemoryStore::new()),
        }
    }
}

/// 策略协调器
pub struct PolicyReconciler {
    compiler: PolicyCompiler,
    stores: ObjectStores,
    publisher: Arc<dyn Publisher>,
}

impl PolicyReconciler {
    pub fn new(
        compiler: PolicyCompiler,
        stores: ObjectStores,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            compiler,
            stores,
            publisher,
        }
    }

    /// 协调一条策略，返回已发布的应用集合
    ///
    /// 命名端口没有有效选项时，受影响的地址集组被清空成员后发布，然后返回
    /// [`Error::NoEffectiveOption`]；策略的其余对象保持上一次成功应用的状态。
    ///
    /// 只有带地址集归属标签的组会被清空。命名端口只解析到单个地址时，规则直接引用该地址，
    /// 此时已发布规则的目标地址不会被撤回，直到下一次成功协调或 [`Self::remove`]。
    pub async fn reconcile(&self, intent: &PolicyIntent) -> Result<ApplyBatch> {
        let owner = &intent.owner;
        info!("开始协调策略 {}", owner);

        let compiled = match self.compiler.compile(intent) {
            Ok(compiled) => compiled,
            Err(Error::NoEffectiveOption {
                rule,
                stale_address_sets,
            }) => {
                warn!("策略 {} 的规则 {} 没有有效选项，清空其地址集组", owner, rule);
                let existing = self.stores.groups.list(owner).await;
                let cleared = self.cleared_groups(&existing, &stale_address_sets);
                let affected: Vec<BackendGroup> = existing
                    .into_iter()
                    .filter(|g| cleared.iter().any(|c| c.id == g.id))
                    .collect();

                let mut batch = ApplyBatch::new(owner.clone());
                batch.groups = diff(&affected, &cleared);
                self.publish_and_commit(batch).await?;

                return Err(Error::NoEffectiveOption {
                    rule,
                    stale_address_sets,
                });
            }
            Err(e) => {
                error!("策略 {} 编译失败: {}", owner, e);
                return Err(e);
            }
        };

        let existing_groups = self.stores.groups.list(owner).await;
        let mut desired_groups = compiled.groups;
        for cleared in self.cleared_groups(&existing_groups, &compiled.cleared_address_sets) {
            if !desired_groups.iter().any(|g| g.id == cleared.id) {
                desired_groups.push(cleared);
            }
        }

        let batch = ApplyBatch {
            owner: owner.clone(),
            policies: diff(
                &self.stores.policies.list(owner).await,
                std::slice::from_ref(&compiled.policy),
            ),
            groups: diff(&existing_groups, &desired_groups),
            rules: diff(&self.stores.rules.list(owner).await, &compiled.rules),
            shares: diff(&self.stores.shares.list(owner).await, &compiled.shares),
        };
        self.publish_and_commit(batch).await
    }

    /// 撤销一条策略的全部已发布对象
    pub async fn remove(&self, owner: &OwnerRef) -> Result<ApplyBatch> {
        info!("撤销策略 {}", owner);
        let batch = ApplyBatch {
            owner: owner.clone(),
            policies: diff(&self.stores.policies.list(owner).await, &[]),
            groups: diff(&self.stores.groups.list(owner).await, &[]),
            rules: diff(&self.stores.rules.list(owner).await, &[]),
            shares: diff(&self.stores.shares.list(owner).await, &[]),
        };
        self.publish_and_commit(batch).await
    }

    /// 并发协调多条策略，每条策略的结果相互独立
    pub async fn reconcile_many(&self, intents: &[PolicyIntent]) -> Vec<Result<ApplyBatch>> {
        join_all(intents.iter().map(|intent| self.reconcile(intent))).await
    }

    /// 已发布的、归属键在 `keys` 中的地址集组，成员清空
    fn cleared_groups(&self, existing: &[BackendGroup], keys: &[String]) -> Vec<BackendGroup> {
        if keys.is_empty() {
            return Vec::new();
        }
        let scope = &self.compiler.naming().address_set_scope;
        existing
            .iter()
            .filter(|g| {
                g.tags
                    .iter()
                    .any(|t| &t.scope == scope && keys.contains(&t.tag))
            })
            .map(|g| {
                let mut cleared = g.clone();
                cleared.expression.clear();
                cleared
            })
            .collect()
    }

    async fn publish_and_commit(&self, batch: ApplyBatch) -> Result<ApplyBatch> {
        if batch.is_empty() {
            debug!("所有者 {} 没有需要发布的变化", batch.owner);
            return Ok(batch);
        }

        if let Err(e) = self.publisher.publish(&batch).await {
            error!("所有者 {} 的批次发布失败: {}", batch.owner, e);
            return Err(e);
        }

        let owner = &batch.owner;
        self.stores.policies.apply(owner, &batch.policies).await?;
        self.stores.groups.apply(owner, &batch.groups).await?;
        self.stores.rules.apply(owner, &batch.rules).await?;
        self.stores.shares.apply(owner, &batch.shares).await?;

        info!(
            "所有者 {} 已发布 {} 个对象（删除 {}）",
            owner,
            batch.len(),
            batch.deletions()
        );
        Ok(batch)
    }
}
