//! 检查点账本：每个检查点（修订号）依赖一组 slug，全部下载结束后才可提交。
//!
//! 推进规则：从配置的一端开始，连续弹出已清空的检查点，遇到第一个仍有待处理条目的检查点即停止；
//! 弹出的最大修订号若高于当前水位线，则持久化并返回。永远不会越过未完成的检查点。

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::models::SyncPlan;

/// 推进扫描从账本的哪一端开始。
///
/// 修订日志按新到旧读取并依次 `push` 时，最后加入的是最旧的修订，应使用 `LastAdded`。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    #[default]
    LastAdded,
    FirstAdded,
}

/// 水位线的持久化目标。
pub trait WatermarkSink {
    type Error;

    fn persist(&mut self, watermark: u64) -> Result<(), Self::Error>;
}

/// 只保存在内存中的水位线，记录每次持久化的值。
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub persisted: Vec<u64>,
}

impl WatermarkSink for MemorySink {
    type Error = std::convert::Infallible;

    fn persist(&mut self, watermark: u64) -> Result<(), Self::Error> {
        self.persisted.push(watermark);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub number: u64,
    pub pending: HashSet<String>,
}

pub struct CheckpointLedger<S: WatermarkSink> {
    order: VecDeque<u64>,
    checkpoints: HashMap<u64, HashSet<String>>,
    index: HashMap<String, Vec<u64>>,
    direction: ScanDirection,
    watermark: u64,
    sink: S,
}

impl<S: WatermarkSink> CheckpointLedger<S> {
    pub fn new(direction: ScanDirection, watermark: u64, sink: S) -> Self {
        Self {
            order: VecDeque::new(),
            checkpoints: HashMap::new(),
            index: HashMap::new(),
            direction,
            watermark,
            sink,
        }
    }

    /// 按计划文件中的顺序依次加入检查点。
    pub fn from_plan(plan: &SyncPlan, direction: ScanDirection, watermark: u64, sink: S) -> Self {
        let mut ledger = Self::new(direction, watermark, sink);
        for rev in &plan.revisions {
            ledger.push(rev.number, rev.items.iter().cloned());
        }
        ledger
    }

    /// 加入一个检查点；同一修订号重复加入时合并依赖集合。
    pub fn push<I, T>(&mut self, number: u64, deps: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        if !self.checkpoints.contains_key(&number) {
            self.order.push_back(number);
        }
        let pending = self.checkpoints.entry(number).or_default();
        for dep in deps {
            let dep = dep.into();
            if pending.insert(dep.clone()) {
                self.index.entry(dep).or_default().push(number);
            }
        }
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn direction(&self) -> ScanDirection {
        self.direction
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn remaining(&self) -> usize {
        self.order.len()
    }

    /// 扫描起点处的检查点（下一个待提交的）。
    pub fn head(&self) -> Option<Checkpoint> {
        let number = self.head_number()?;
        let pending = self.checkpoints.get(&number)?.clone();
        Some(Checkpoint { number, pending })
    }

    /// 该 slug 是否正阻塞扫描起点处的检查点。
    pub fn is_blocking(&self, slug: &str) -> bool {
        self.head_number()
            .and_then(|n| self.checkpoints.get(&n))
            .is_some_and(|pending| pending.contains(slug))
    }

    /// 标记 slug 已结束；水位线推进时返回新值。重复或未知的 slug 不产生任何效果。
    pub fn resolve(&mut self, slug: &str) -> Result<Option<u64>, S::Error> {
        let Some(numbers) = self.index.remove(slug) else {
            return Ok(None);
        };
        for number in numbers {
            if let Some(pending) = self.checkpoints.get_mut(&number) {
                pending.remove(slug);
            }
        }
        self.advance()
    }

    /// 提交扫描起点处连续的已清空检查点。
    pub fn advance(&mut self) -> Result<Option<u64>, S::Error> {
        let mut candidate: Option<u64> = None;
        while let Some(number) = self.head_number() {
            let drained = self
                .checkpoints
                .get(&number)
                .is_none_or(|pending| pending.is_empty());
            if !drained {
                break;
            }
            self.pop_head();
            self.checkpoints.remove(&number);
            debug!(target: "ledger", number, "checkpoint satisfied");
            candidate = Some(candidate.map_or(number, |c| c.max(number)));
        }

        match candidate {
            Some(number) if number > self.watermark => {
                self.sink.persist(number)?;
                self.watermark = number;
                info!(target: "ledger", watermark = number, "本地副本已推进到 r{number}");
                Ok(Some(number))
            }
            _ => Ok(None),
        }
    }

    fn head_number(&self) -> Option<u64> {
        match self.direction {
            ScanDirection::LastAdded => self.order.back().copied(),
            ScanDirection::FirstAdded => self.order.front().copied(),
        }
    }

    fn pop_head(&mut self) {
        match self.direction {
            ScanDirection::LastAdded => self.order.pop_back(),
            ScanDirection::FirstAdded => self.order.pop_front(),
        };
    }
}
