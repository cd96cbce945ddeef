//! 单飞创建
//!
//! 同一个键在同一时刻至多有一次进行中的创建。进行中的创建以
//! `Shared` 共享给所有等待者，表中只保存它的弱引用与中止句柄：
//!
//! - 所有等待者都放弃后创建随之被丢弃，下一个调用者开启新一轮创建
//! - 关闭容器时中止全部进行中的创建，等待者得到 `ShutdownInProgress`

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::{abortable, AbortHandle, BoxFuture, FutureExt, Shared, WeakShared};
use tracing::debug;

use crate::graph::describe_cycle;
use crate::registry::{Instance, Key};
use crate::utils::{DiError, Result};

/// 共享的创建任务
pub(crate) type Creation = Shared<BoxFuture<'static, Result<Instance>>>;

struct PendingEntry {
    creation: WeakShared<BoxFuture<'static, Result<Instance>>>,
    abort: AbortHandle,
    episode: u64,
}

/// 等待别人创建的调用方：它身处 `holding` 这些键的创建之中，正在等待 `target`
struct Waiter {
    holding: Vec<Key>,
    target: Key,
}

#[derive(Default)]
struct FlightTable {
    pending: HashMap<Key, PendingEntry>,
    waiters: HashMap<u64, Waiter>,
    closed: bool,
}

impl FlightTable {
    /// 沿等待关系从 `target` 出发，若能回到 `holding` 中的某个键则返回环路径
    fn wait_cycle(&self, holding: &[Key], target: &Key) -> Option<Vec<Key>> {
        if holding.is_empty() || self.waiters.is_empty() {
            return None;
        }

        let mut came_from: HashMap<Key, Key> = HashMap::new();
        let mut seen: HashSet<Key> = HashSet::from([target.clone()]);
        let mut queue = VecDeque::from([target.clone()]);

        while let Some(current) = queue.pop_front() {
            let blocked_on = self
                .waiters
                .values()
                .filter(|w| w.holding.contains(&current))
                .map(|w| &w.target);

            for next in blocked_on {
                if holding.contains(next) {
                    came_from.insert(next.clone(), current.clone());
                    return Some(cycle_path(holding, target, next, &came_from));
                }
                if seen.insert(next.clone()) {
                    came_from.insert(next.clone(), current.clone());
                    queue.push_back(next.clone());
                }
            }
        }
        None
    }
}

/// `holding` 中从 `hit` 开始的一段，接上 `target -> ... -> hit`
fn cycle_path(holding: &[Key], target: &Key, hit: &Key, came_from: &HashMap<Key, Key>) -> Vec<Key> {
    let mut tail = vec![hit.clone()];
    let mut cursor = hit;
    while cursor != target {
        match came_from.get(cursor) {
            Some(prev) => {
                tail.push(prev.clone());
                cursor = prev;
            }
            None => break,
        }
    }
    tail.reverse();

    let start = holding.iter().position(|k| k == hit).unwrap_or(0);
    let mut path: Vec<Key> = holding[start..].to_vec();
    path.extend(tail);
    path
}

/// 加入或发起创建的结果
pub(crate) enum Flight<'a> {
    /// 存储中已有实例
    Ready(Instance),
    /// 加入了已在进行的创建，等待期间持有登记
    Joined(Creation, WaitGuard<'a>),
    /// 发起了新一轮创建
    Started(Creation),
}

/// 等待登记，释放时撤销
pub(crate) struct WaitGuard<'a> {
    in_flight: &'a InFlight,
    id: u64,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.table().waiters.remove(&self.id);
    }
}

/// 进行中创建表
#[derive(Default)]
pub(crate) struct InFlight {
    table: Mutex<FlightTable>,
    next_episode: AtomicU64,
    next_waiter: AtomicU64,
}

impl InFlight {
    fn table(&self) -> MutexGuard<'_, FlightTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 加入已有创建或发起新创建
    ///
    /// 持有表锁时先调用 `recheck` 再次查询存储，避免与刚完成的创建竞争。
    /// `start` 接收本轮编号并构造创建 future（此时尚未执行）。
    ///
    /// # 参数
    ///
    /// * `key` - 要解析的键
    /// * `holding` - 调用方所在解析链上属于本容器的键（从根到当前）
    /// * `recheck` - 再次查询存储
    /// * `start` - 构造创建 future
    ///
    /// # Errors
    ///
    /// - `ShutdownInProgress` - 表已关闭
    /// - `CircularDependency` - 加入后会与其他调用链互相等待
    pub(crate) fn join_or_start<R, S>(
        &self,
        key: &Key,
        holding: &[Key],
        recheck: R,
        start: S,
    ) -> Result<Flight<'_>>
    where
        R: FnOnce() -> Option<Instance>,
        S: FnOnce(u64) -> BoxFuture<'static, Result<Instance>>,
    {
        // 升级得到的临时句柄在表锁释放之后才丢弃
        let mut upgraded: Vec<Creation> = Vec::new();
        let mut table = self.table();

        if table.closed {
            return Err(DiError::ShutdownInProgress);
        }

        if let Some(instance) = recheck() {
            return Ok(Flight::Ready(instance));
        }

        if let Some(creation) = table.pending.get(key).and_then(|entry| entry.creation.upgrade()) {
            if let Some(path) = table.wait_cycle(holding, key) {
                debug!(key = %key, "等待其他调用链的创建会形成环");
                upgraded.push(creation);
                return Err(DiError::CircularDependency(describe_cycle(&path)));
            }

            let id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
            table.waiters.insert(
                id,
                Waiter {
                    holding: holding.to_vec(),
                    target: key.clone(),
                },
            );
            return Ok(Flight::Joined(creation, WaitGuard { in_flight: self, id }));
        }

        // 所有等待者都已放弃的表项
        table.pending.retain(|_, entry| match entry.creation.upgrade() {
            Some(creation) => {
                upgraded.push(creation);
                true
            }
            None => false,
        });

        let episode = self.next_episode.fetch_add(1, Ordering::Relaxed);
        let (task, abort) = abortable(start(episode));
        let creation: Creation = task
            .map(|outcome| outcome.unwrap_or_else(|_| Err(DiError::ShutdownInProgress)))
            .boxed()
            .shared();

        if let Some(weak) = creation.downgrade() {
            table.pending.insert(
                key.clone(),
                PendingEntry {
                    creation: weak,
                    abort,
                    episode,
                },
            );
        }
        Ok(Flight::Started(creation))
    }

    /// 创建结束：表未关闭时调用 `publish` 写入存储，并移除同一轮的表项
    ///
    /// # 返回
    ///
    /// 表已关闭时返回 false，`publish` 不会被调用
    pub(crate) fn complete<P>(&self, key: &Key, episode: u64, publish: P) -> bool
    where
        P: FnOnce(),
    {
        let mut table = self.table();
        if table.pending.get(key).map(|e| e.episode == episode).unwrap_or(false) {
            table.pending.remove(key);
        }
        if table.closed {
            return false;
        }
        publish();
        true
    }

    /// 关闭表并中止全部进行中的创建，返回中止数量
    ///
    /// 关闭后 `join_or_start` 一律返回 `ShutdownInProgress`。
    pub(crate) fn abort_all(&self) -> usize {
        let drained: Vec<PendingEntry> = {
            let mut table = self.table();
            table.closed = true;
            table.pending.drain().map(|(_, e)| e).collect()
        };
        for entry in &drained {
            entry.abort.abort();
        }
        drained.len()
    }

    /// 仍有等待者的创建数量
    pub(crate) fn active_count(&self) -> usize {
        let mut upgraded: Vec<Creation> = Vec::new();
        let table = self.table();
        for entry in table.pending.values() {
            if let Some(creation) = entry.creation.upgrade() {
                upgraded.push(creation);
            }
        }
        upgraded.len()
    }

    #[cfg(test)]
    fn waiter_count(&self) -> usize {
        self.table().waiters.len()
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.table().pending.len()
    }
}
