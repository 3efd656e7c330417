//! 全局配置结构（MirrorConfig）与默认值。
//!
//! 该模块同时提供生成 `mirror.yml` 的字段元信息。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};
use crate::catalog::AssetKind;
use crate::sync::ledger::ScanDirection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorConfig {
    // 并发配置
    #[serde(default = "default_parallel")]
    pub parallel: usize,
    #[serde(default = "default_downloader_command")]
    pub downloader_command: Vec<String>,

    // 路径配置
    #[serde(default)]
    pub mirror_root: String,

    // 目录发现配置
    #[serde(default = "default_min_active_installs")]
    pub min_active_installs: u64,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    // 进度配置
    #[serde(default = "default_probe_grace_secs")]
    pub probe_grace_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_line_width")]
    pub line_width: usize,

    // 同步配置
    #[serde(default = "default_exit_grace_ms")]
    pub exit_grace_ms: u64,
    #[serde(default)]
    pub scan_direction: ScanDirection,
    #[serde(default = "default_false")]
    pub hold_on_failure: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            downloader_command: default_downloader_command(),
            mirror_root: String::new(),
            min_active_installs: default_min_active_installs(),
            api_base_url: default_api_base_url(),
            request_timeout: default_request_timeout(),
            probe_grace_secs: default_probe_grace_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            line_width: default_line_width(),
            exit_grace_ms: default_exit_grace_ms(),
            scan_direction: ScanDirection::default(),
            hold_on_failure: default_false(),
        }
    }
}

impl ConfigSpec for MirrorConfig {
    const FILE_NAME: &'static str = "mirror.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 12] = [
            FieldMeta {
                name: "parallel",
                description: "同时运行的下载进程数",
            },
            FieldMeta {
                name: "downloader_command",
                description: "单个条目的下载命令（会追加 plugins/themes 与 slug 两个参数）",
            },
            FieldMeta {
                name: "mirror_root",
                description: "镜像根目录（留空表示当前目录）",
            },
            FieldMeta {
                name: "min_active_installs",
                description: "全量同步时纳入的最少活跃安装数",
            },
            FieldMeta {
                name: "api_base_url",
                description: "目录 API 地址",
            },
            FieldMeta {
                name: "request_timeout",
                description: "目录 API 请求超时时间（秒）",
            },
            FieldMeta {
                name: "probe_grace_secs",
                description: "单个条目下载超过该秒数后，探测远端大小并显示百分比",
            },
            FieldMeta {
                name: "probe_timeout_secs",
                description: "大小探测（HEAD 请求）超时时间（秒）",
            },
            FieldMeta {
                name: "line_width",
                description: "进度行最大宽度，超出时省略附加信息（0 表示不限制）",
            },
            FieldMeta {
                name: "exit_grace_ms",
                description: "输出结束后等待下载进程退出的时间, 单位ms",
            },
            FieldMeta {
                name: "scan_direction",
                description: "检查点推进方向, 可选: [last_added, first_added]\n修订记录按新到旧读取时使用 last_added",
            },
            FieldMeta {
                name: "hold_on_failure",
                description: "下载失败的条目是否阻止本地修订号推进",
            },
        ];
        &FIELDS
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel == 0 {
            return Err(ConfigError::Validation("parallel must be at least 1".into()));
        }
        if self.downloader_command.is_empty() || self.downloader_command[0].trim().is_empty() {
            return Err(ConfigError::Validation(
                "downloader_command must name a program".into(),
            ));
        }
        Ok(())
    }
}

impl MirrorConfig {
    pub fn root_dir(&self) -> PathBuf {
        if self.mirror_root.trim().is_empty() {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        } else {
            PathBuf::from(&self.mirror_root)
        }
    }

    /// `<root>/plugins` 或 `<root>/themes`，同步状态文件也放在这里。
    pub fn kind_dir(&self, kind: AssetKind) -> PathBuf {
        self.root_dir().join(kind.as_str())
    }

    pub fn probe_grace(&self) -> Duration {
        Duration::from_secs(self.probe_grace_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }

    pub fn exit_grace(&self) -> Duration {
        Duration::from_millis(self.exit_grace_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }
}

fn default_false() -> bool {
    false
}

fn default_parallel() -> usize {
    12
}

fn default_downloader_command() -> Vec<String> {
    vec!["./download".to_string()]
}

fn default_min_active_installs() -> u64 {
    10_000
}

fn default_api_base_url() -> String {
    "https://api.wordpress.org".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_probe_grace_secs() -> u64 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_line_width() -> usize {
    120
}

fn default_exit_grace_ms() -> u64 {
    1000
}
