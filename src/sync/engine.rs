//! 同步主循环：启动进程池 → 逐行消费事件 → 更新进度与检查点 → 校验进程池退出状态。
//!
//! 失败时已持久化的水位线不会回滚。

use std::io;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::event::{DecodeError, Event, decode_raw};
use super::ledger::{CheckpointLedger, WatermarkSink};
use super::models::{SyncStats, WorkItem};
use super::pool::{PoolExit, PoolLauncher, WorkerStream};
use super::progress::{ProgressLine, ProgressTracker, SizeProbe};
use crate::base_system::state_files::{FailedLog, StateError};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] DecodeError),
    #[error("error from download script: {details}")]
    Worker { details: String },
    #[error("unexpected worker pool exit code: {0}")]
    UnexpectedExit(i32),
    #[error("worker pool should not still be running")]
    StillRunning,
    #[error("worker pool io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to persist sync state: {0}")]
    State(#[from] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Dispatching,
    Draining,
    Finalizing,
    Completed,
    Failed,
}

pub type LineCallback = Box<dyn FnMut(&ProgressLine) + Send>;

pub struct SyncEngine<P, S>
where
    P: SizeProbe,
    S: WatermarkSink,
{
    tracker: ProgressTracker<P>,
    ledger: Option<CheckpointLedger<S>>,
    failed_log: Option<FailedLog>,
    hold_on_failure: bool,
    stats: SyncStats,
    phase: SyncPhase,
    line_width: usize,
    on_line: Option<LineCallback>,
}

impl<P, S> SyncEngine<P, S>
where
    P: SizeProbe,
    S: WatermarkSink,
    StateError: From<S::Error>,
{
    /// 全量同步时 `ledger` 为 `None`。
    pub fn new(tracker: ProgressTracker<P>, ledger: Option<CheckpointLedger<S>>) -> Self {
        Self {
            tracker,
            ledger,
            failed_log: None,
            hold_on_failure: false,
            stats: SyncStats::default(),
            phase: SyncPhase::Dispatching,
            line_width: 0,
            on_line: None,
        }
    }

    pub fn with_failed_log(mut self, log: FailedLog) -> Self {
        self.failed_log = Some(log);
        self
    }

    /// 为 `true` 时失败的条目不会从检查点中移除。
    pub fn hold_on_failure(mut self, hold: bool) -> Self {
        self.hold_on_failure = hold;
        self
    }

    pub fn line_width(mut self, width: usize) -> Self {
        self.line_width = width;
        self
    }

    /// 替换默认的 stdout 输出。
    pub fn on_line(mut self, cb: LineCallback) -> Self {
        self.on_line = Some(cb);
        self
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub fn ledger(&self) -> Option<&CheckpointLedger<S>> {
        self.ledger.as_ref()
    }

    /// 启动进程池并跑完整个同步。进程池在任何退出路径上都会被回收。
    pub fn run(
        &mut self,
        launcher: &PoolLauncher,
        items: &[WorkItem],
        parallelism: usize,
    ) -> Result<SyncStats, SyncError> {
        self.phase = SyncPhase::Dispatching;
        self.stats = SyncStats::new(items.len());
        if items.is_empty() {
            info!(target: "sync", "没有需要下载的条目");
            return self.settle_empty();
        }
        let mut pool = match launcher.spawn(items, parallelism) {
            Ok(pool) => pool,
            Err(err) => {
                self.phase = SyncPhase::Failed;
                return Err(err.into());
            }
        };
        self.drive(&mut pool, items.len())
    }

    /// 消费一个已启动的输出流直到结束，然后判定退出状态。`total` 为派发的条目数。
    pub fn drive<W: WorkerStream>(
        &mut self,
        stream: &mut W,
        total: usize,
    ) -> Result<SyncStats, SyncError> {
        self.stats = SyncStats::new(total);
        let result = self.drain(stream).and_then(|()| self.finalize(stream));
        match &result {
            Ok(stats) => {
                self.phase = SyncPhase::Completed;
                info!(
                    target: "sync",
                    total = stats.total,
                    updated = stats.updated,
                    failed = stats.failed,
                    "同步完成"
                );
            }
            Err(err) => {
                self.phase = SyncPhase::Failed;
                error!(target: "sync", error = %err, "同步中止");
            }
        }
        result
    }

    fn settle_empty(&mut self) -> Result<SyncStats, SyncError> {
        if let Some(ledger) = self.ledger.as_mut() {
            ledger.advance().map_err(StateError::from)?;
        }
        self.phase = SyncPhase::Completed;
        Ok(self.stats)
    }

    fn drain<W: WorkerStream>(&mut self, stream: &mut W) -> Result<(), SyncError> {
        self.phase = SyncPhase::Draining;
        if let Some(ledger) = self.ledger.as_mut()
            && let Some(watermark) = ledger.advance().map_err(StateError::from)?
        {
            info!(target: "sync", watermark, "空检查点已提交");
        }

        while let Some(line) = stream.next_line() {
            let line = line?;
            let event = decode_raw(&line)?;
            self.apply(event)?;
        }
        Ok(())
    }

    fn apply(&mut self, event: Event) -> Result<(), SyncError> {
        let now = Instant::now();
        let mut advanced = None;

        match &event {
            Event::Start { slug, .. } => {
                debug!(target: "sync", slug = slug.as_str(), "开始下载");
            }
            Event::Done { slug } => {
                self.stats.updated += 1;
                advanced = self.resolve(slug)?;
            }
            Event::Fail { slug } => {
                self.stats.failed += 1;
                warn!(target: "sync", slug = slug.as_str(), "下载失败");
                if let Some(log) = &self.failed_log {
                    log.append(slug)?;
                }
                if !self.hold_on_failure {
                    advanced = self.resolve(slug)?;
                }
            }
            Event::FatalError { details } => {
                return Err(SyncError::Worker {
                    details: details.clone(),
                });
            }
        }

        let line = match (&self.ledger, advanced) {
            (_, Some(_)) => self.tracker.observe(&event, &self.stats, now, None),
            (Some(ledger), None) => {
                let blocking = |slug: &str| ledger.is_blocking(slug);
                self.tracker
                    .observe(&event, &self.stats, now, Some(&blocking))
            }
            (None, None) => {
                let any = |_: &str| true;
                self.tracker.observe(&event, &self.stats, now, Some(&any))
            }
        };

        if let Some(mut line) = line {
            if let Some(watermark) = advanced {
                line = line.with_note(format!("-> local copy now at r{watermark}"));
            }
            self.emit(&line);
        }
        Ok(())
    }

    fn resolve(&mut self, slug: &str) -> Result<Option<u64>, SyncError> {
        match self.ledger.as_mut() {
            Some(ledger) => Ok(ledger.resolve(slug).map_err(StateError::from)?),
            None => Ok(None),
        }
    }

    fn finalize<W: WorkerStream>(&mut self, stream: &mut W) -> Result<SyncStats, SyncError> {
        self.phase = SyncPhase::Finalizing;
        match stream.finish()? {
            PoolExit::CleanExit => Ok(self.stats),
            PoolExit::UnexpectedExit(code) => Err(SyncError::UnexpectedExit(code)),
            PoolExit::StillRunning => Err(SyncError::StillRunning),
        }
    }

    fn emit(&mut self, line: &ProgressLine) {
        match self.on_line.as_mut() {
            Some(cb) => cb(line),
            None => println!("{}", line.render(self.line_width)),
        }
    }
}
