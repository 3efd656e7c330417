//! 同步相关的数据模型：待下载条目、统计、增量同步计划。

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub slug: String,
}

impl WorkItem {
    pub fn new(slug: impl Into<String>) -> Self {
        Self { slug: slug.into() }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total: usize,
    pub updated: usize,
    pub failed: usize,
}

impl SyncStats {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn finished(&self) -> usize {
        self.updated + self.failed
    }

    /// 已结束条目占比（0–100）。
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        100.0 * self.finished() as f64 / self.total as f64
    }
}

/// 一个修订号及其引入的、需要重新下载的条目。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionPlan {
    pub number: u64,
    #[serde(default)]
    pub items: Vec<String>,
}

/// 增量同步计划，`revisions` 与修订日志顺序一致（新到旧）。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    #[serde(default)]
    pub revisions: Vec<RevisionPlan>,
}

impl SyncPlan {
    /// 读取 YAML 或 JSON 格式的计划文件。
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read sync plan {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse sync plan {}", path.display()))
    }

    /// 所有修订涉及条目的并集，按首次出现的顺序去重。
    pub fn stale_items(&self) -> Vec<WorkItem> {
        let mut seen = HashSet::new();
        self.revisions
            .iter()
            .flat_map(|rev| rev.items.iter())
            .filter(|slug| seen.insert(slug.as_str()))
            .map(|slug| WorkItem::new(slug.as_str()))
            .collect()
    }

    pub fn newest_revision(&self) -> Option<u64> {
        self.revisions.iter().map(|r| r.number).max()
    }
}

/// 读取全量同步的条目列表：每行一个 slug，空行与 `#` 注释忽略，`slug,installs` 只取 slug。
pub fn load_item_list(path: &Path) -> Result<Vec<WorkItem>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read item list {}", path.display()))?;
    let mut seen = HashSet::new();
    Ok(raw
        .lines()
        .map(|line| line.split(',').next().unwrap_or("").trim())
        .filter(|slug| !slug.is_empty() && !slug.starts_with('#'))
        .filter(|slug| seen.insert(slug.to_string()))
        .map(WorkItem::new)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_matches_progress_format() {
        let stats = SyncStats {
            total: 8,
            updated: 3,
            failed: 1,
        };
        assert_eq!(stats.percent(), 50.0);
        assert_eq!(SyncStats::new(0).percent(), 100.0);
    }

    #[test]
    fn stale_items_dedup_in_first_seen_order() {
        let plan: SyncPlan = serde_yaml::from_str(
            r#"
revisions:
  - number: 12
    items: [jetpack, akismet]
  - number: 11
    items: [akismet, hello-dolly]
  - number: 10
"#,
        )
        .unwrap();
        let slugs: Vec<_> = plan.stale_items().into_iter().map(|i| i.slug).collect();
        assert_eq!(slugs, vec!["jetpack", "akismet", "hello-dolly"]);
        assert_eq!(plan.newest_revision(), Some(12));
    }

    #[test]
    fn plan_accepts_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        fs::write(&path, r#"{"revisions":[{"number":5,"items":["a"]}]}"#).unwrap();
        let plan = SyncPlan::load(&path).unwrap();
        assert_eq!(plan.revisions[0].number, 5);
    }

    #[test]
    fn item_list_accepts_active_installs_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items");
        fs::write(&path, "akismet,5000000\n\n# comment\njetpack\nakismet\n").unwrap();
        let slugs: Vec<_> = load_item_list(&path)
            .unwrap()
            .into_iter()
            .map(|i| i.slug)
            .collect();
        assert_eq!(slugs, vec!["akismet", "jetpack"]);
    }
}
