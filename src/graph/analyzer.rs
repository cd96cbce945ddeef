//! 依赖图分析器
//!
//! 对注册表快照做纯函数式分析，得到三种结果之一：
//!
//! - `Valid(layers)`: 分层拓扑顺序
//! - `Circular(path)`: 环路径上的键名
//! - `Missing(names)`: 所有未满足的依赖名（去重、排序）
//!
//! 缺失依赖检查先于环检测执行。由祖先容器提供的键视为外部键，
//! 既不算缺失也不参与分层。

use std::collections::BTreeSet;

use tracing::debug;

use crate::graph::dependency::{format_path, DependencyGraph};
use crate::registry::{Key, Registration, Registry};
use crate::utils::{DiError, Result};

/// 分析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphAnalysis {
    /// 合法，附带分层结果
    Valid(Vec<Vec<Key>>),
    /// 存在环，附带环路径上的键名
    Circular(Vec<String>),
    /// 存在未注册的依赖
    Missing(Vec<String>),
}

impl GraphAnalysis {
    /// 是否合法
    pub fn is_valid(&self) -> bool {
        matches!(self, GraphAnalysis::Valid(_))
    }

    /// 转换为结果
    ///
    /// # Errors
    ///
    /// `Circular` 转为 `CircularDependency`，`Missing` 转为 `MissingDependencies`
    pub fn into_result(self) -> Result<Vec<Vec<Key>>> {
        match self {
            GraphAnalysis::Valid(layers) => Ok(layers),
            GraphAnalysis::Circular(path) => Err(DiError::CircularDependency(path.join(" -> "))),
            GraphAnalysis::Missing(names) => Err(DiError::MissingDependencies(names)),
        }
    }
}

/// 依赖图分析器
pub struct DependencyAnalyzer<'a> {
    registry: &'a Registry,
    external: Box<dyn Fn(&Key) -> bool + Send + Sync + 'a>,
}

impl<'a> DependencyAnalyzer<'a> {
    /// 创建分析器
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            external: Box::new(|_| false),
        }
    }

    /// 设置外部键判定（例如由父容器提供的键）
    pub fn with_external<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Key) -> bool + Send + Sync + 'a,
    {
        self.external = Box::new(predicate);
        self
    }

    /// 分析整个注册表
    pub fn analyze(&self) -> GraphAnalysis {
        self.analyze_subset(|_| true)
    }

    /// 只分析满足条件的注册项
    ///
    /// 缺失检查仍然针对整个注册表（子集内的键依赖了任何地方都不存在的键即为缺失）。
    /// 分层使用完整依赖图上的传递依赖：子集内的键经由子集外的键间接依赖另一个
    /// 子集内的键时，仍然排在它之后。环检测覆盖子集及其全部传递依赖。
    pub fn analyze_subset<P>(&self, include: P) -> GraphAnalysis
    where
        P: Fn(&Registration) -> bool,
    {
        let members: Vec<Registration> = self
            .registry
            .get_all()
            .into_iter()
            .filter(|r| include(r))
            .collect();

        let missing = self.find_missing(&members);
        if !missing.is_empty() {
            debug!(count = missing.len(), "发现缺失依赖");
            return GraphAnalysis::Missing(missing);
        }

        let full = self.dependency_graph();
        let member_keys: BTreeSet<&Key> = members.iter().map(Registration::key).collect();

        let mut reachable: BTreeSet<Key> = BTreeSet::new();
        let mut closures: Vec<(&Key, Vec<Key>)> = Vec::with_capacity(members.len());
        for registration in &members {
            let closure = full.get_all_dependencies(registration.key());
            reachable.insert(registration.key().clone());
            reachable.extend(closure.iter().cloned());
            closures.push((registration.key(), closure));
        }

        let mut reachable_graph = DependencyGraph::new();
        for key in &reachable {
            reachable_graph.add_node(key);
            for dep in full.get_dependencies(key) {
                reachable_graph.add_dependency(key, &dep);
            }
        }
        if let Some(cycle) = reachable_graph.find_cycle() {
            return GraphAnalysis::Circular(cycle.iter().map(|k| k.name().to_string()).collect());
        }

        let mut graph = DependencyGraph::new();
        for (key, closure) in &closures {
            graph.add_node(key);
            for dep in closure.iter().filter(|dep| member_keys.contains(dep)) {
                graph.add_dependency(key, dep);
            }
        }

        match graph.topological_layers() {
            Ok(layers) => GraphAnalysis::Valid(layers),
            Err(DiError::CircularDependency(path)) => {
                GraphAnalysis::Circular(path.split(" -> ").map(str::to_string).collect())
            }
            Err(other) => GraphAnalysis::Circular(vec![other.to_string()]),
        }
    }

    /// 构建完整依赖图（不含外部键）
    pub fn dependency_graph(&self) -> DependencyGraph {
        let members = self.registry.get_all();
        self.build_graph(&members, |dep| self.registry.contains(dep))
    }

    /// 导出 Graphviz DOT 描述，节点附带作用域
    pub fn describe(&self) -> String {
        let graph = self.dependency_graph();
        graph.to_dot(|key| self.registry.get(key).map(|r| r.scope().to_string()))
    }

    fn find_missing(&self, members: &[Registration]) -> Vec<String> {
        let missing: BTreeSet<String> = members
            .iter()
            .flat_map(|r| r.dependencies())
            .filter(|dep| !self.registry.contains(*dep) && !(self.external)(*dep))
            .map(|dep| dep.name().to_string())
            .collect();
        missing.into_iter().collect()
    }

    fn build_graph<F>(&self, members: &[Registration], keep_edge: F) -> DependencyGraph
    where
        F: Fn(&Key) -> bool,
    {
        let mut graph = DependencyGraph::new();
        for registration in members {
            graph.add_node(registration.key());
            for dep in registration.dependencies() {
                if keep_edge(dep) {
                    graph.add_dependency(registration.key(), dep);
                }
            }
        }
        graph
    }
}

/// 格式化环路径，供运行期解析链使用
pub fn describe_cycle(path: &[Key]) -> String {
    format_path(path)
}
