//! 已发布对象存储
//!
//! 按策略所有者保存最近一次成功发布的对象副本。只有在发布确认成功之后才允许写入，
//! 失败的发布不会让存储偏离上一次成功应用的状态。

use aegisgate_common::{BackendObject, OwnerRef, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

/// 按所有者划分的对象存储
#[async_trait]
pub trait ObjectStore<T: BackendObject>: Send + Sync {
    async fn get(&self, owner: &OwnerRef, id: &str) -> Option<T>;

    async fn list(&self, owner: &OwnerRef) -> Vec<T>;

    /// 提交一批已发布的对象，带删除标记的对象被移除
    async fn apply(&self, owner: &OwnerRef, objects: &[T]) -> Result<()>;
}

/// 内存存储
pub struct MemoryStore<T> {
    objects: RwLock<HashMap<OwnerRef, BTreeMap<String, T>>>,
}

impl<T> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: BackendObject> ObjectStore<T> for MemoryStore<T> {
    async fn get(&self, owner: &OwnerRef, id: &str) -> Option<T> {
        let objects = self.objects.read().await;
        objects.get(owner).and_then(|o| o.get(id)).cloned()
    }

    async fn list(&self, owner: &OwnerRef) -> Vec<T> {
        let objects = self.objects.read().await;
        objects
            .get(owner)
            .map(|o| o.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn apply(&self, owner: &OwnerRef, objects: &[T]) -> Result<()> {
        let mut store = self.objects.write().await;
        let entries = store.entry(owner.clone()).or_default();

        for object in objects {
            if object.marked_for_delete() {
                entries.remove(object.id());
            } else {
                entries.insert(object.id().to_string(), object.clone());
            }
        }

        if entries.is_empty() {
            store.remove(owner);
        }
        debug!("所有者 {} 已提交 {} 个对象", owner, objects.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegisgate_common::BackendShare;
    use aegisgate_common::SharingStrategy;

    fn share(id: &str) -> BackendShare {
        BackendShare {
            id: id.to_string(),
            display_name: id.to_string(),
            path: format!("/orgs/o/infra/shares/{}", id),
            shared_with: vec!["/orgs/o/projects/p".to_string()],
            sharing_strategy: SharingStrategy::AllDescendants,
            child_resources: vec![],
            tags: vec![],
            revision: None,
            marked_for_delete: false,
        }
    }

    #[tokio::test]
    async fn test_apply_and_remove() {
        let store = MemoryStore::new();
        let owner = OwnerRef::new("ns1", "web", "uid-1");
        let other = OwnerRef::new("ns2", "web", "uid-2");

        store.apply(&owner, &[share("a"), share("b")]).await.unwrap();
        store.apply(&other, &[share("c")]).await.unwrap();
        assert_eq!(store.list(&owner).await.len(), 2);
        assert!(store.get(&owner, "c").await.is_none());

        let mut removed = share("a");
        removed.marked_for_delete = true;
        store.apply(&owner, &[removed]).await.unwrap();
        assert_eq!(store.list(&owner).await.len(), 1);
        assert!(store.get(&owner, "b").await.is_some());
        assert_eq!(store.list(&other).await.len(), 1);
    }
}
