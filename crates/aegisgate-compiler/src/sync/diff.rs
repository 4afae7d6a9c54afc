//! 协调差异计算
//!
//! 比较存储中的已发布对象与本轮编译出的期望对象，得到最小的应用集合。
//! 仅存在于已发布集合中的对象带删除标记进入同一集合，与创建、更新一起原子发布。

use aegisgate_common::BackendObject;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// 计算应用集合
///
/// - 内容未变的对象被丢弃；
/// - 内容变化的对象以期望内容出现，并携带已发布对象的版本号；
/// - 仅在期望集合中的对象作为创建；
/// - 仅在已发布集合中的对象标记为删除。
pub fn diff<T: BackendObject>(existing: &[T], desired: &[T]) -> Vec<T> {
    let existing_by_id: HashMap<&str, &T> = existing.iter().map(|o| (o.id(), o)).collect();
    let mut desired_ids = HashSet::with_capacity(desired.len());
    let mut apply = Vec::new();

    for object in desired {
        desired_ids.insert(object.id());
        match existing_by_id.get(object.id()) {
            Some(current) if current.content_eq(object) && !current.marked_for_delete() => {
                debug!("对象 {} 未变化", object.id());
            }
            Some(current) => {
                let mut update = object.clone();
                update.set_revision(current.revision());
                update.set_marked_for_delete(false);
                apply.push(update);
            }
            None => {
                let mut create = object.clone();
                create.set_marked_for_delete(false);
                apply.push(create);
            }
        }
    }

    for object in existing {
        if !desired_ids.contains(object.id()) {
            let mut stale = object.clone();
            stale.set_marked_for_delete(true);
            apply.push(stale);
        }
    }

    apply
}

#[cfg(test)]
mod tests {
    use super::*;
    use aegisgate_common::{BackendGroup, ExpressionNode};

    fn group(id: &str, address: &str, revision: Option<i64>) -> BackendGroup {
        BackendGroup {
            id: id.to_string(),
            display_name: id.to_string(),
            path: format!("/infra/domains/default/groups/{}", id),
            tags: vec![],
            expression: vec![ExpressionNode::Addresses {
                ip_addresses: vec![address.to_string()],
            }],
            revision,
            marked_for_delete: false,
        }
    }

    #[test]
    fn test_diff_classifies_objects() {
        let existing = vec![
            group("same", "10.0.0.1", Some(3)),
            group("changed", "10.0.0.2", Some(5)),
            group("gone", "10.0.0.3", Some(1)),
        ];
        let desired = vec![
            group("same", "10.0.0.1", None),
            group("changed", "10.0.0.9", None),
            group("new", "10.0.0.4", None),
        ];

        let apply = diff(&existing, &desired);
        let ids: Vec<&str> = apply.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["changed", "new", "gone"]);

        assert_eq!(apply[0].revision, Some(5));
        assert_eq!(apply[0].addresses(), vec!["10.0.0.9"]);
        assert!(!apply[0].marked_for_delete);
        assert!(!apply[1].marked_for_delete);
        assert!(apply[2].marked_for_delete);
        assert_eq!(apply[2].revision, Some(1));
    }

    #[test]
    fn test_diff_is_idempotent() {
        let existing = vec![group("a", "10.0.0.1", Some(1)), group("b", "10.0.0.2", Some(1))];
        let desired = vec![group("a", "10.0.0.1", None)];

        let first = diff(&existing, &desired);
        let second = diff(&existing, &desired);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!(first[0].marked_for_delete);
        assert_eq!(first[0].id, "b");
    }

    #[test]
    fn test_diff_of_empty_sets() {
        let empty: Vec<BackendGroup> = Vec::new();
        assert!(diff(&empty, &empty).is_empty());
        assert_eq!(diff(&empty, &[group("a", "10.0.0.1", None)]).len(), 1);
    }
}
