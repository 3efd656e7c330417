//! 分页拉取热门插件/主题及其活跃安装数。
//!
//! 插件结果大致按活跃安装数排序，遇到低于阈值的条目后处理完当前页即可停止；
//! 主题排序很模糊，需要遍历所有页。

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::blocking::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use super::AssetKind;

pub const ACTIVE_INSTALLS_FILE: &str = ".active_installs";

const PER_PAGE: u32 = 250;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to download {kind} list (page {page}): {source}")]
    Http {
        kind: AssetKind,
        page: u32,
        source: reqwest::Error,
    },
    #[error("failed to download {kind} list (page {page}): {reason}")]
    BadPage {
        kind: AssetKind,
        page: u32,
        reason: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopularAsset {
    pub slug: String,
    pub active_installs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CatalogPage {
    pub pages: u32,
    pub assets: Vec<PopularAsset>,
}

pub struct CatalogClient {
    client: Client,
    base_url: String,
    show_progress: bool,
}

impl CatalogClient {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wporg-mirror/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            show_progress: true,
        })
    }

    pub fn show_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn page_url(&self, kind: AssetKind, page: u32) -> String {
        format!(
            "{base}/{kind}/info/1.2/?action=query_{kind}&request[browse]=popular&request[fields][active_installs]=1&request[per_page]={PER_PAGE}&request[page]={page}",
            base = self.base_url,
        )
    }

    fn fetch_page(&self, kind: AssetKind, page: u32) -> Result<CatalogPage, CatalogError> {
        let url = self.page_url(kind, page);
        debug!(target: "catalog", %url, "fetch page");
        let body: Value = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.json())
            .map_err(|source| CatalogError::Http { kind, page, source })?;
        parse_page(kind, &body).map_err(|reason| CatalogError::BadPage { kind, page, reason })
    }

    /// 拉取活跃安装数不低于 `min_installs` 的条目，按安装数降序返回。
    pub fn fetch_popular(
        &self,
        kind: AssetKind,
        min_installs: u64,
    ) -> Result<Vec<PopularAsset>, CatalogError> {
        let bar = if self.show_progress {
            let bar = ProgressBar::with_draw_target(Some(1), ProgressDrawTarget::stderr());
            bar.set_style(
                ProgressStyle::with_template("{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("##-"),
            );
            bar.set_prefix(format!("{kind} 目录"));
            bar
        } else {
            ProgressBar::hidden()
        };

        let mut assets: Vec<PopularAsset> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut page = 1;
        let mut pages = 1;

        while page <= pages {
            let result = self.fetch_page(kind, page)?;
            pages = result.pages;
            bar.set_length(u64::from(pages.max(1)));
            bar.set_position(u64::from(page));

            let mut last_page = false;
            for asset in result.assets {
                if asset.active_installs >= min_installs {
                    match positions.get(&asset.slug) {
                        Some(&idx) => assets[idx] = asset,
                        None => {
                            positions.insert(asset.slug.clone(), assets.len());
                            assets.push(asset);
                        }
                    }
                } else if kind == AssetKind::Plugins {
                    last_page = true;
                }
            }
            if last_page {
                debug!(target: "catalog", page, "below threshold, stop paging");
                break;
            }
            page += 1;
        }
        bar.finish_and_clear();

        assets.sort_by(|a, b| b.active_installs.cmp(&a.active_installs));
        info!(target: "catalog", %kind, count = assets.len(), min_installs, "热门列表已获取");
        Ok(assets)
    }
}

pub(crate) fn parse_page(kind: AssetKind, body: &Value) -> Result<CatalogPage, String> {
    let pages = body
        .get("info")
        .and_then(|info| info.get("pages"))
        .and_then(Value::as_u64)
        .ok_or_else(|| "missing info.pages".to_string())?;
    let list = body
        .get(kind.as_str())
        .and_then(Value::as_array)
        .ok_or_else(|| format!("missing {kind} array"))?;

    let assets = list
        .iter()
        .filter_map(|entry| {
            let slug = entry.get("slug")?.as_str()?.trim();
            if slug.is_empty() {
                return None;
            }
            let active_installs = match entry.get("active_installs") {
                Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
                Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
                _ => 0,
            };
            Some(PopularAsset {
                slug: slug.to_string(),
                active_installs,
            })
        })
        .collect();

    Ok(CatalogPage {
        pages: u32::try_from(pages).unwrap_or(u32::MAX),
        assets,
    })
}

/// 写入 `<kind_dir>/.active_installs`，每行 `slug,installs`。
pub fn write_active_installs(kind_dir: &Path, assets: &[PopularAsset]) -> Result<(), CatalogError> {
    let path = kind_dir.join(ACTIVE_INSTALLS_FILE);
    let io_err = |source| CatalogError::Io {
        path: path.clone(),
        source,
    };
    fs::create_dir_all(kind_dir).map_err(io_err)?;
    let body: String = assets
        .iter()
        .map(|a| format!("{},{}\n", a.slug, a.active_installs))
        .collect();
    fs::write(&path, body).map_err(io_err)
}

/// 读取 `.active_installs`；无法解析的行忽略。
pub fn read_active_installs(path: &Path) -> std::io::Result<HashMap<String, u64>> {
    let raw = fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| {
            let (slug, installs) = line.split_once(',')?;
            Some((slug.trim().to_string(), installs.trim().parse().unwrap_or(0)))
        })
        .collect())
}
