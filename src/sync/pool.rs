//! 下载进程池：把待下载 slug 写入工作列表，用 `xargs -P` 扇出固定数量的下载进程，
//! 合并它们的 stdout 作为逐行事件流。
//!
//! stderr 直接继承给操作者，不解析。只检查 `xargs` 整体的退出码，不区分单个下载进程。

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::models::WorkItem;

pub const WORK_LIST_FILE: &str = ".to_download";

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 输出流结束后对进程池退出状态的判定。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolExit {
    CleanExit,
    UnexpectedExit(i32),
    StillRunning,
}

/// 同步引擎消费的逐行输出源。
pub trait WorkerStream {
    /// 下一行原始字节（不含换行符）；流结束返回 `None`。
    fn next_line(&mut self) -> Option<io::Result<Vec<u8>>>;

    /// 关闭输出并判定退出状态。
    fn finish(&mut self) -> io::Result<PoolExit>;
}

/// 如何启动单个下载进程：`program args... <slug>`。
#[derive(Debug, Clone)]
pub struct PoolLauncher {
    pub fanout_program: String,
    pub downloader: Vec<String>,
    pub work_dir: PathBuf,
    pub exit_grace: Duration,
}

impl PoolLauncher {
    pub fn new(downloader: Vec<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            fanout_program: "xargs".to_string(),
            downloader,
            work_dir: work_dir.into(),
            exit_grace: Duration::from_secs(1),
        }
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn work_list_path(&self) -> PathBuf {
        self.work_dir.join(WORK_LIST_FILE)
    }

    pub fn spawn(&self, items: &[WorkItem], parallelism: usize) -> io::Result<WorkerPool> {
        let parallelism = parallelism.max(1);
        let work_list = self.work_list_path();
        write_work_list(&work_list, items)?;

        let mut cmd = Command::new(&self.fanout_program);
        cmd.arg("-n")
            .arg("1")
            .arg("-P")
            .arg(parallelism.to_string())
            .args(&self.downloader)
            .stdin(Stdio::from(File::open(&work_list)?))
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("worker pool stdout was not captured"))?;

        info!(
            target: "pool",
            items = items.len(),
            parallelism,
            pid = child.id(),
            "下载进程池已启动"
        );

        Ok(WorkerPool {
            child: Some(child),
            stdout: Some(BufReader::new(stdout)),
            exit_grace: self.exit_grace,
        })
    }
}

fn write_work_list(path: &Path, items: &[WorkItem]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut body = String::with_capacity(items.len() * 16);
    for item in items {
        body.push_str(&item.slug);
        body.push('\n');
    }
    fs::write(path, body)
}

/// 运行中的进程池。丢弃时若进程仍在运行会被杀掉并回收。
pub struct WorkerPool {
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    exit_grace: Duration,
}

impl WorkerStream for WorkerPool {
    fn next_line(&mut self) -> Option<io::Result<Vec<u8>>> {
        let reader = self.stdout.as_mut()?;
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                while matches!(line.last(), Some(b'\n' | b'\r')) {
                    line.pop();
                }
                Some(Ok(line))
            }
            Err(err) => Some(Err(err)),
        }
    }

    fn finish(&mut self) -> io::Result<PoolExit> {
        self.stdout.take();
        let Some(child) = self.child.as_mut() else {
            return Ok(PoolExit::CleanExit);
        };

        let deadline = Instant::now() + self.exit_grace;
        loop {
            if let Some(status) = child.try_wait()? {
                self.child = None;
                debug!(target: "pool", ?status, "下载进程池已退出");
                return Ok(match status.code() {
                    Some(0) => PoolExit::CleanExit,
                    Some(code) => PoolExit::UnexpectedExit(code),
                    None => PoolExit::UnexpectedExit(signal_exit_code(&status)),
                });
            }
            if Instant::now() >= deadline {
                warn!(target: "pool", "输出已结束但下载进程池仍在运行");
                return Ok(PoolExit::StillRunning);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            if let Ok(Some(_)) = child.try_wait() {
                return;
            }
            warn!(target: "pool", pid = child.id(), "终止未退出的下载进程池");
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(unix)]
fn signal_exit_code(status: &std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(|sig| 128 + sig).unwrap_or(-1)
}

#[cfg(not(unix))]
fn signal_exit_code(_status: &std::process::ExitStatus) -> i32 {
    -1
}
