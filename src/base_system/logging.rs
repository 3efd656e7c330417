//! 日志：控制台（stderr）+ `<base>/logs/latest.log`。
//!
//! 启动时上次遗留的日志超过 10MB 会先归档；退出时把本次日志打包为 `log_<时间戳>.zip`。
//! stdout 只留给同步进度行。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{Subscriber, error, info, warn};
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::{LookupSpan, Registry};
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const LATEST_LOG: &str = "latest.log";
const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const DRAIN_WAIT: Duration = Duration::from_millis(200);

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    pub console: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            archive_on_exit: true,
            console: true,
        }
    }
}

impl LogOptions {
    /// 命令行默认：彩色控制台，退出时归档。
    pub fn cli(debug: bool) -> Self {
        Self {
            debug,
            ..Self::default()
        }
    }
}

/// 持有后台写入线程；丢弃时刷新并归档日志。
pub struct LogSystem {
    shutdown: Arc<Shutdown>,
}

impl LogSystem {
    pub fn init(options: LogOptions) -> Result<Self, LogError> {
        Self::init_with_base(options, None)
    }

    /// 日志目录为 `base_dir/logs`，未指定时为当前目录下的 `logs`。
    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        if tracing::dispatcher::has_been_set() {
            return Err(LogError::AlreadyInitialized);
        }

        let logs_dir = base_dir.map_or_else(|| PathBuf::from("logs"), |base| base.join("logs"));
        fs::create_dir_all(&logs_dir)?;
        let latest = logs_dir.join(LATEST_LOG);
        rotate_oversized(&latest, &logs_dir, MAX_LOG_BYTES)?;

        let (file_writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .finish(rolling::never(&logs_dir, LATEST_LOG));

        let layers =
            console_layer::<Registry>(&options).and_then(file_layer::<Registry>(file_writer));
        tracing_subscriber::registry().with(layers).try_init()?;

        let shutdown = Arc::new(Shutdown {
            logs_dir,
            latest,
            guard: Mutex::new(Some(guard)),
            done: AtomicBool::new(false),
            archive: options.archive_on_exit,
        });
        shutdown.hook_ctrlc();
        shutdown.hook_panic();

        info!(
            target: "startup",
            logs = %shutdown.logs_dir.display(),
            debug = options.debug,
            "日志系统已就绪"
        );
        Ok(Self { shutdown })
    }

    pub fn logs_dir(&self) -> &Path {
        &self.shutdown.logs_dir
    }

    pub fn safe_exit(&self) {
        self.shutdown.run();
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.shutdown.run();
    }
}

fn console_layer<S>(options: &LogOptions) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    let level = if options.debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let writer = if options.console {
        BoxMakeWriter::new(io::stderr)
    } else {
        BoxMakeWriter::new(io::sink)
    };
    fmt::layer()
        .with_target(false)
        .with_ansi(options.use_color)
        .with_writer(writer)
        .with_filter(level)
        .boxed()
}

fn file_layer<S>(writer: NonBlocking) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + 'static,
{
    fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(LevelFilter::DEBUG)
        .boxed()
}

struct Shutdown {
    logs_dir: PathBuf,
    latest: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    done: AtomicBool,
    archive: bool,
}

impl Shutdown {
    fn hook_ctrlc(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);
        let installed = ctrlc::set_handler(move || {
            // 下载进程同属一个进程组，会一起收到 SIGINT
            shutdown.run();
            std::process::exit(130);
        });
        if let Err(err) = installed {
            warn!(target: "startup", error = %err, "无法注册 Ctrl-C 处理");
        }
    }

    fn hook_panic(self: &Arc<Self>) {
        let shutdown = Arc::clone(self);
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(target: "startup", "程序崩溃: {info}");
            shutdown.run();
            previous(info);
        }));
    }

    /// 只执行一次。
    fn run(&self) {
        if self.done.swap(true, Ordering::SeqCst) {
            return;
        }
        // 丢弃 guard 会把写入线程里剩余的日志刷到文件
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
        if !self.archive {
            return;
        }
        thread::sleep(DRAIN_WAIT);
        if let Err(err) = archive_log_file(&self.latest, &self.logs_dir) {
            eprintln!("日志归档失败: {err}");
        }
    }
}

fn rotate_oversized(latest: &Path, logs_dir: &Path, limit: u64) -> Result<(), LogError> {
    if fs::metadata(latest).is_ok_and(|meta| meta.len() >= limit) {
        archive_log_file(latest, logs_dir)?;
    }
    Ok(())
}

/// 把 `latest` 打包进 `logs_dir/log_<时间戳>.zip` 并删除原文件；空文件直接删除。
fn archive_log_file(latest: &Path, logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    let len = match fs::metadata(latest) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len == 0 {
        fs::remove_file(latest)?;
        return Ok(None);
    }

    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let archive_path = logs_dir.join(format!("log_{stamp}.zip"));

    let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
    zip.start_file(
        format!("{stamp}.log"),
        FileOptions::default().compression_method(CompressionMethod::Deflated),
    )?;
    io::copy(&mut File::open(latest)?, &mut zip)?;
    zip.finish()?;

    fs::remove_file(latest)?;
    Ok(Some(archive_path))
}
