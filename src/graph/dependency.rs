//! 依赖关系图
//!
//! 节点是注册键，边是声明的依赖（`a -> b` 表示 a 依赖 b）。
//! 内部使用有序映射，所有遍历按键顺序进行，结果可复现。
//!
//! # 示例
//!
//! ```rust
//! use chips_di::graph::DependencyGraph;
//! use chips_di::Key;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency(&Key::new("app"), &Key::new("db"));
//!
//! assert_eq!(graph.get_dependencies(&Key::new("app")), vec![Key::new("db")]);
//! assert!(!graph.has_cycle());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use crate::registry::Key;
use crate::utils::{DiError, Result};

/// 依赖关系图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：键 -> 它依赖的键
    edges: BTreeMap<Key, BTreeSet<Key>>,
    /// 反向边：键 -> 依赖它的键
    reverse_edges: BTreeMap<Key, BTreeSet<Key>>,
}

impl DependencyGraph {
    /// 创建空图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加节点，已存在时忽略
    pub fn add_node(&mut self, key: &Key) {
        self.edges.entry(key.clone()).or_default();
        self.reverse_edges.entry(key.clone()).or_default();
    }

    /// 添加依赖边，两端节点不存在时自动添加
    pub fn add_dependency(&mut self, from: &Key, to: &Key) {
        self.add_node(from);
        self.add_node(to);
        self.edges.entry(from.clone()).or_default().insert(to.clone());
        self.reverse_edges
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
    }

    /// 直接依赖
    pub fn get_dependencies(&self, key: &Key) -> Vec<Key> {
        self.edges
            .get(key)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 直接依赖方
    pub fn get_dependents(&self, key: &Key) -> Vec<Key> {
        self.reverse_edges
            .get(key)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 传递依赖（依赖在前）
    pub fn get_all_dependencies(&self, key: &Key) -> Vec<Key> {
        let mut result = Vec::new();
        let mut visited = BTreeSet::new();
        self.collect_dependencies(key, &mut result, &mut visited);
        result
    }

    fn collect_dependencies(&self, key: &Key, result: &mut Vec<Key>, visited: &mut BTreeSet<Key>) {
        if !visited.insert(key.clone()) {
            return;
        }
        if let Some(deps) = self.edges.get(key) {
            for dep in deps {
                self.collect_dependencies(dep, result, visited);
                if !result.contains(dep) {
                    result.push(dep.clone());
                }
            }
        }
    }

    /// 是否存在环
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找一个环
    ///
    /// 深度优先遍历，返回从第一个重复出现的键到它自身的路径，
    /// 例如 `[a, b, a]`。
    pub fn find_cycle(&self) -> Option<Vec<Key>> {
        let mut visited = BTreeSet::new();
        let mut visiting = BTreeSet::new();
        let mut path = Vec::new();

        self.edges
            .keys()
            .find_map(|node| self.find_cycle_from(node, &mut visited, &mut visiting, &mut path))
    }

    fn find_cycle_from(
        &self,
        node: &Key,
        visited: &mut BTreeSet<Key>,
        visiting: &mut BTreeSet<Key>,
        path: &mut Vec<Key>,
    ) -> Option<Vec<Key>> {
        if visiting.contains(node) {
            let start = path.iter().position(|k| k == node)?;
            let mut cycle = path[start..].to_vec();
            cycle.push(node.clone());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node.clone());
        visiting.insert(node.clone());
        path.push(node.clone());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_from(neighbor, visited, visiting, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        visiting.remove(node);
        None
    }

    /// 分层拓扑排序（带层级的 Kahn 算法）
    ///
    /// 第 i 层恰好包含所有依赖都位于前 i 层的键，同层键互不依赖。
    ///
    /// # Errors
    ///
    /// 存在环时返回 `CircularDependency`
    pub fn topological_layers(&self) -> Result<Vec<Vec<Key>>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(DiError::CircularDependency(format_path(&cycle)));
        }

        // 入度 = 尚未完成的依赖数
        let mut remaining: BTreeMap<&Key, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node, deps.len()))
            .collect();

        let mut current: Vec<Key> = remaining
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| (*node).clone())
            .collect();

        let mut layers = Vec::new();
        let mut placed = 0;

        while !current.is_empty() {
            let mut next = Vec::new();
            for node in &current {
                for dependent in self.reverse_edges.get(node).into_iter().flatten() {
                    if let Some(degree) = remaining.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(dependent.clone());
                        }
                    }
                }
            }
            placed += current.len();
            next.sort();
            layers.push(std::mem::replace(&mut current, next));
        }

        if placed != self.edges.len() {
            return Err(DiError::CircularDependency("无法完成拓扑排序".to_string()));
        }
        Ok(layers)
    }

    /// 初始化顺序（依赖在前）
    pub fn get_load_order(&self) -> Result<Vec<Key>> {
        Ok(self.topological_layers()?.into_iter().flatten().collect())
    }

    /// 释放顺序（初始化顺序的反序）
    pub fn get_unload_order(&self) -> Result<Vec<Key>> {
        let mut order = self.get_load_order()?;
        order.reverse();
        Ok(order)
    }

    /// 导出 Graphviz DOT 描述
    ///
    /// `label` 为每个节点返回附加说明（例如作用域），返回 None 时只显示键名。
    pub fn to_dot<F>(&self, label: F) -> String
    where
        F: Fn(&Key) -> Option<String>,
    {
        let mut out = String::from("digraph dependencies {\n    rankdir=LR;\n");
        for node in self.edges.keys() {
            let text = match label(node) {
                Some(extra) => format!("{}\\n{}", escape(node.name()), escape(&extra)),
                None => escape(node.name()),
            };
            let _ = writeln!(out, "    \"{}\" [label=\"{}\"];", escape(node.name()), text);
        }
        for (from, deps) in &self.edges {
            for to in deps {
                let _ = writeln!(
                    out,
                    "    \"{}\" -> \"{}\";",
                    escape(from.name()),
                    escape(to.name())
                );
            }
        }
        out.push_str("}\n");
        out
    }

    /// 节点数量
    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// 边数量
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 是否包含节点
    pub fn contains(&self, key: &Key) -> bool {
        self.edges.contains_key(key)
    }

    /// 全部节点（有序）
    pub fn nodes(&self) -> Vec<Key> {
        self.edges.keys().cloned().collect()
    }
}

/// 以箭头连接键名
pub fn format_path(path: &[Key]) -> String {
    path.iter().map(Key::name).collect::<Vec<_>>().join(" -> ")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
