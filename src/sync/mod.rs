//! 同步引擎模块入口。
//!
//! 子模块：
//! - `event`：下载进程输出协议（start / done / fail / error）
//! - `pool`：下载进程池（xargs 扇出，合并 stdout）
//! - `progress`：在途条目跟踪、慢速条目大小探测、进度行
//! - `ledger`：检查点账本与水位线推进
//! - `models`：WorkItem / SyncStats / SyncPlan
//! - `engine`：同步主循环

pub mod engine;
pub mod event;
pub mod ledger;
pub mod models;
pub mod pool;
pub mod progress;

pub use engine::{SyncEngine, SyncError, SyncPhase};
pub use event::{Event, decode_line, decode_raw};
pub use ledger::{CheckpointLedger, ScanDirection, WatermarkSink};
pub use models::{SyncPlan, SyncStats, WorkItem};
pub use pool::{PoolExit, PoolLauncher, WorkerStream};
pub use progress::{HttpSizeProbe, ProgressTracker, SizeProbe};
