//! 远端目录：条目类型与按活跃安装数分页拉取热门列表。

pub mod discovery;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use discovery::{CatalogClient, CatalogError, PopularAsset};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Plugins,
    Themes,
}

impl AssetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AssetKind::Plugins => "plugins",
            AssetKind::Themes => "themes",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
