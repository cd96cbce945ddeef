//! 解析链
//!
//! 记录当前调用链上正在解析的 (键, 容器 ID)。链是不可变的单向链表，
//! 每次进入嵌套解析都生成一个新节点，不同调用链之间互不共享。

use std::fmt;
use std::sync::Arc;

use crate::registry::Key;

struct ChainNode {
    key: Key,
    container_id: Arc<str>,
    parent: Option<Arc<ChainNode>>,
}

/// 解析链
#[derive(Clone, Default)]
pub struct ResolutionChain {
    head: Option<Arc<ChainNode>>,
    depth: usize,
}

impl ResolutionChain {
    /// 空链
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个节点，返回新链（原链不变）
    pub fn push(&self, key: Key, container_id: Arc<str>) -> Self {
        Self {
            head: Some(Arc::new(ChainNode {
                key,
                container_id,
                parent: self.head.clone(),
            })),
            depth: self.depth + 1,
        }
    }

    /// 链长度
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    fn iter(&self) -> impl Iterator<Item = &ChainNode> {
        std::iter::successors(self.head.as_deref(), |node| node.parent.as_deref())
    }

    /// 链上是否已有同一容器中的同一个键
    pub fn contains(&self, key: &Key, container_id: &str) -> bool {
        self.iter()
            .any(|node| &node.key == key && &*node.container_id == container_id)
    }

    /// 链上属于指定容器的键（从根到当前）
    pub fn keys_in(&self, container_id: &str) -> Vec<Key> {
        let mut keys: Vec<Key> = self
            .iter()
            .filter(|node| &*node.container_id == container_id)
            .map(|node| node.key.clone())
            .collect();
        keys.reverse();
        keys
    }

    /// 从根到当前的键序列
    pub fn keys(&self) -> Vec<Key> {
        let mut keys: Vec<Key> = self.iter().map(|node| node.key.clone()).collect();
        keys.reverse();
        keys
    }

    /// 若再次进入 `key` 会形成环，返回环路径（从第一次出现到再次出现）
    pub fn cycle_path(&self, key: &Key, container_id: &str) -> Option<Vec<Key>> {
        if !self.contains(key, container_id) {
            return None;
        }

        // 自底向上收集直到遇到第一次出现的位置
        let mut path = vec![key.clone()];
        for node in self.iter() {
            path.push(node.key.clone());
            if &node.key == key && &*node.container_id == container_id {
                break;
            }
        }
        path.reverse();
        Some(path)
    }
}

impl fmt::Debug for ResolutionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn test_push_is_persistent() {
        let root = ResolutionChain::new();
        let a = root.push(Key::new("a"), id("c1"));
        let ab = a.push(Key::new("b"), id("c1"));

        assert!(root.is_empty());
        assert_eq!(a.depth(), 1);
        assert_eq!(ab.keys(), vec![Key::new("a"), Key::new("b")]);
        assert!(!a.contains(&Key::new("b"), "c1"));
    }

    #[test]
    fn test_keys_in_filters_container() {
        let chain = ResolutionChain::new()
            .push(Key::new("a"), id("child"))
            .push(Key::new("db"), id("parent"))
            .push(Key::new("b"), id("child"));
        assert_eq!(chain.keys_in("child"), vec![Key::new("a"), Key::new("b")]);
        assert_eq!(chain.keys_in("parent"), vec![Key::new("db")]);
        assert!(chain.keys_in("other").is_empty());
    }

    #[test]
    fn test_contains_respects_container() {
        let chain = ResolutionChain::new().push(Key::new("a"), id("child"));
        assert!(chain.contains(&Key::new("a"), "child"));
        assert!(!chain.contains(&Key::new("a"), "parent"));
    }

    #[test]
    fn test_cycle_path() {
        let chain = ResolutionChain::new()
            .push(Key::new("root"), id("c"))
            .push(Key::new("a"), id("c"))
            .push(Key::new("b"), id("c"));

        let path = chain.cycle_path(&Key::new("a"), "c").unwrap();
        assert_eq!(path, vec![Key::new("a"), Key::new("b"), Key::new("a")]);
        assert!(chain.cycle_path(&Key::new("x"), "c").is_none());
    }

    #[test]
    fn test_self_cycle_path() {
        let chain = ResolutionChain::new().push(Key::new("a"), id("c"));
        let path = chain.cycle_path(&Key::new("a"), "c").unwrap();
        assert_eq!(path, vec![Key::new("a"), Key::new("a")]);
    }
}
