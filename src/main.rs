//! wporg-mirror 命令行入口。
//!
//! - `sync`：全量或按修订计划增量同步插件/主题
//! - `discover`：只拉取热门目录并写入 `.active_installs`
//! - `report`：汇总扫描结果

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use wporg_mirror::base_system::config::load_or_create;
use wporg_mirror::base_system::context::MirrorConfig;
use wporg_mirror::base_system::logging::{LogOptions, LogSystem};
use wporg_mirror::base_system::state_files::{FailedLog, WatermarkStore};
use wporg_mirror::catalog::discovery::{
    ACTIVE_INSTALLS_FILE, read_active_installs, write_active_installs,
};
use wporg_mirror::catalog::{AssetKind, CatalogClient};
use wporg_mirror::report::ScanSummary;
use wporg_mirror::sync::models::load_item_list;
use wporg_mirror::sync::{
    CheckpointLedger, HttpSizeProbe, PoolLauncher, ProgressTracker, SyncEngine, SyncError,
    SyncPlan, WorkItem,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "wporg-mirror")]
#[command(about = "Mirror WordPress.org plugins and themes")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（存放 mirror.yml 和 logs）
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 下载缺失或过期的条目
    Sync {
        #[arg(value_enum)]
        kind: AssetKind,

        /// 增量同步计划（YAML/JSON，修订按新到旧排列）
        #[arg(long, conflicts_with = "items")]
        plan: Option<PathBuf>,

        /// 全量同步的条目列表（每行一个 slug）；不指定时从目录 API 拉取
        #[arg(long)]
        items: Option<PathBuf>,

        /// 覆盖配置中的并发数
        #[arg(long)]
        parallel: Option<usize>,
    },
    /// 拉取热门目录并写入 .active_installs
    Discover {
        #[arg(value_enum)]
        kind: AssetKind,
    },
    /// 汇总扫描结果
    Report {
        scan_file: PathBuf,

        /// 活跃安装数文件（默认 <mirror_root>/plugins/.active_installs）
        #[arg(long)]
        installs: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("wporg-mirror v{VERSION}");
        return ExitCode::SUCCESS;
    }

    let Cli {
        debug,
        data_dir,
        command,
        ..
    } = cli;
    let data_dir = data_dir.as_deref().map(Path::new);
    let _log = match init_logging(debug, data_dir) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(command, data_dir) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(target: "startup", "{err:#}");
            if err.downcast_ref::<SyncError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(command: Option<Command>, data_dir: Option<&Path>) -> Result<()> {
    let config =
        load_or_create::<MirrorConfig>(data_dir).map_err(|e| anyhow!(e.to_string()))?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    match command {
        Some(Command::Sync {
            kind,
            plan,
            items,
            parallel,
        }) => run_sync(&config, kind, plan.as_deref(), items.as_deref(), parallel),
        Some(Command::Discover { kind }) => {
            let kind_dir = config.kind_dir(kind);
            let assets = discover(&config, kind, &kind_dir)?;
            println!(
                "{} {kind} with >= {} active installs",
                assets.len(),
                config.min_active_installs
            );
            Ok(())
        }
        Some(Command::Report {
            scan_file,
            installs,
        }) => run_report(&config, &scan_file, installs.as_deref()),
        None => Err(anyhow!("no command given, see --help")),
    }
}

fn run_sync(
    config: &MirrorConfig,
    kind: AssetKind,
    plan_path: Option<&Path>,
    items_path: Option<&Path>,
    parallel: Option<usize>,
) -> Result<()> {
    let kind_dir = config.kind_dir(kind);
    fs::create_dir_all(&kind_dir)
        .with_context(|| format!("create mirror dir {}", kind_dir.display()))?;

    let store = WatermarkStore::in_dir(&kind_dir);
    let watermark = store.load()?;

    let (items, ledger) = match plan_path {
        Some(path) => {
            let plan = SyncPlan::load(path)?;
            if plan.newest_revision().is_some_and(|newest| newest <= watermark) {
                warn!(
                    target: "sync",
                    watermark,
                    "计划中的修订都不晚于本地修订号，水位线不会推进"
                );
            }
            let ledger =
                CheckpointLedger::from_plan(&plan, config.scan_direction, watermark, store);
            info!(
                target: "sync",
                %kind,
                watermark,
                revisions = ledger.remaining(),
                "增量同步"
            );
            (plan.stale_items(), Some(ledger))
        }
        None => {
            let items = match items_path {
                Some(path) => load_item_list(path)?,
                None => discover(config, kind, &kind_dir)?
                    .into_iter()
                    .map(|a| WorkItem::new(a.slug))
                    .collect(),
            };
            info!(target: "sync", %kind, items = items.len(), "全量同步");
            (items, None)
        }
    };

    let probe = HttpSizeProbe::new(config.probe_timeout())?;
    let tracker = ProgressTracker::with_grace(probe, config.probe_grace());

    let mut downloader = config.downloader_command.clone();
    downloader.push(kind.as_str().to_string());
    let launcher = PoolLauncher::new(downloader, &kind_dir).with_exit_grace(config.exit_grace());

    let mut engine = SyncEngine::new(tracker, ledger)
        .with_failed_log(FailedLog::in_dir(&kind_dir))
        .hold_on_failure(config.hold_on_failure)
        .line_width(config.line_width);

    let parallel = parallel.unwrap_or(config.parallel).max(1);
    let stats = engine.run(&launcher, &items, parallel)?;

    println!(
        "{kind}: {} total, {} updated, {} failed",
        stats.total, stats.updated, stats.failed
    );
    if let Some(ledger) = engine.ledger() {
        println!("local copy at r{}", ledger.watermark());
    }
    Ok(())
}

fn discover(
    config: &MirrorConfig,
    kind: AssetKind,
    kind_dir: &Path,
) -> Result<Vec<wporg_mirror::catalog::PopularAsset>> {
    let client = CatalogClient::new(&config.api_base_url, config.request_timeout())?;
    let assets = client.fetch_popular(kind, config.min_active_installs)?;
    write_active_installs(kind_dir, &assets)?;
    Ok(assets)
}

fn run_report(config: &MirrorConfig, scan_file: &Path, installs: Option<&Path>) -> Result<()> {
    let installs_path = installs.map(Path::to_path_buf).unwrap_or_else(|| {
        config
            .kind_dir(AssetKind::Plugins)
            .join(ACTIVE_INSTALLS_FILE)
    });
    let installs = match read_active_installs(&installs_path) {
        Ok(map) => map,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                target: "report",
                path = %installs_path.display(),
                "未找到活跃安装数文件，所有插件将显示为 REMOVED"
            );
            HashMap::new()
        }
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", installs_path.display()));
        }
    };

    let file =
        File::open(scan_file).with_context(|| format!("open {}", scan_file.display()))?;
    let summary = ScanSummary::from_lines(BufReader::new(file), &installs)?;

    eprintln!("{}", summary.count_line());
    print!("{}", summary.render());
    Ok(())
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    LogSystem::init_with_base(LogOptions::cli(debug), base_dir).map_err(|e| anyhow!(e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_the_subcommand() {
        let cli = Cli::try_parse_from([
            "wporg-mirror",
            "sync",
            "plugins",
            "--plan",
            "plan.yml",
            "--parallel",
            "4",
            "--data-dir",
            "/tmp/mirror",
            "--debug",
        ])
        .unwrap();
        let Cli {
            debug,
            data_dir,
            command,
            ..
        } = cli;
        assert!(debug);
        assert_eq!(data_dir.as_deref(), Some("/tmp/mirror"));
        match command {
            Some(Command::Sync {
                kind,
                plan,
                items,
                parallel,
            }) => {
                assert_eq!(kind, AssetKind::Plugins);
                assert_eq!(plan, Some(PathBuf::from("plan.yml")));
                assert_eq!(items, None);
                assert_eq!(parallel, Some(4));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn plan_and_items_are_exclusive() {
        let err = Cli::try_parse_from([
            "wporg-mirror",
            "sync",
            "themes",
            "--plan",
            "a.yml",
            "--items",
            "b.txt",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
