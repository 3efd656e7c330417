//! WordPress.org 插件/主题镜像同步。
//!
//! 代码结构：
//! - `base_system`：配置/日志/同步状态文件等基础设施
//! - `sync`：同步引擎（下载进程池、进度、检查点账本、主循环）
//! - `catalog`：远端热门目录分页拉取
//! - `report`：扫描结果汇总

pub mod base_system;
pub mod catalog;
pub mod report;
pub mod sync;
