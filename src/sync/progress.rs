//! 进度跟踪与进度行渲染。
//!
//! 记录正在下载的条目；某个条目下载超过宽限期后，在下一次事件时对其远端文件做一次
//! 大小探测（HEAD 请求），之后用本地文件大小估算百分比，附加在进度行末尾。
//! 探测与文件大小读取失败只影响显示，不会中断同步。

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_LENGTH;
use tracing::debug;

use super::event::Event;
use super::models::SyncStats;

pub const DEFAULT_PROBE_GRACE: Duration = Duration::from_secs(30);

/// 查询远端文件总大小；未知或失败返回 `None`。
pub trait SizeProbe {
    fn size_of(&self, url: &str) -> Option<u64>;
}

/// 通过 HEAD 请求读取 `Content-Length`。
pub struct HttpSizeProbe {
    client: Client,
}

impl HttpSizeProbe {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl SizeProbe for HttpSizeProbe {
    fn size_of(&self, url: &str) -> Option<u64> {
        let resp = match self.client.head(url).send() {
            Ok(resp) => resp,
            Err(err) => {
                debug!(target: "sync", url, error = %err, "size probe failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            debug!(target: "sync", url, status = %resp.status(), "size probe rejected");
            return None;
        }
        // HEAD 响应没有 body，不能用 `content_length()`，直接读头部。
        resp.headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|&len| len > 0)
    }
}

/// 不做任何探测。
pub struct NoProbe;

impl SizeProbe for NoProbe {
    fn size_of(&self, _url: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct InFlightRecord {
    pub slug: String,
    pub started_at: Instant,
    pub download_path: PathBuf,
    pub download_url: String,
    /// `None` 表示尚未探测；`Some(None)` 表示探测过但大小未知。
    pub total_size: Option<Option<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    Ok,
    Fail,
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineStatus::Ok => f.write_str(" OK "),
            LineStatus::Fail => f.write_str("FAIL"),
        }
    }
}

/// 一条终态事件对应的进度行。
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub status: LineStatus,
    pub percent: f64,
    pub slug: String,
    pub note: Option<String>,
}

impl ProgressLine {
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// `width` 为 0 表示不限制；放不下时省略附加信息。
    pub fn render(&self, width: usize) -> String {
        let base = format!(
            "[{}] {}  {}",
            self.status,
            format_percent(self.percent),
            self.slug
        );
        let Some(note) = self.note.as_deref() else {
            return base;
        };
        let full = format!("{base}  {note}");
        if width == 0 || textwrap::core::display_width(&full) <= width {
            full
        } else {
            base
        }
    }
}

impl fmt::Display for ProgressLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(0))
    }
}

/// 一位小数加 `%`，左侧补空格到 6 个字符。
pub fn format_percent(percent: f64) -> String {
    format!("{:>6}", format!("{percent:.1}%"))
}

pub struct ProgressTracker<P: SizeProbe> {
    in_flight: HashMap<String, InFlightRecord>,
    probe: P,
    grace: Duration,
}

impl<P: SizeProbe> ProgressTracker<P> {
    pub fn new(probe: P) -> Self {
        Self::with_grace(probe, DEFAULT_PROBE_GRACE)
    }

    pub fn with_grace(probe: P, grace: Duration) -> Self {
        Self {
            in_flight: HashMap::new(),
            probe,
            grace,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn record(&self, slug: &str) -> Option<&InFlightRecord> {
        self.in_flight.get(slug)
    }

    /// 处理一条事件。`Start` 不产生进度行；`Done`/`Fail` 产生进度行，
    /// `watch` 为 `Some` 时对其认可的慢速条目附加 `[slug NN%]`。
    pub fn observe(
        &mut self,
        event: &Event,
        stats: &SyncStats,
        now: Instant,
        watch: Option<&dyn Fn(&str) -> bool>,
    ) -> Option<ProgressLine> {
        let (status, slug) = match event {
            Event::Start {
                slug,
                download_path,
                download_url,
            } => {
                self.in_flight.insert(
                    slug.clone(),
                    InFlightRecord {
                        slug: slug.clone(),
                        started_at: now,
                        download_path: download_path.clone(),
                        download_url: download_url.clone(),
                        total_size: None,
                    },
                );
                return None;
            }
            Event::Done { slug } => (LineStatus::Ok, slug),
            Event::Fail { slug } => (LineStatus::Fail, slug),
            Event::FatalError { .. } => return None,
        };

        self.in_flight.remove(slug);
        let line = ProgressLine {
            status,
            percent: stats.percent(),
            slug: slug.clone(),
            note: None,
        };
        match watch.and_then(|w| self.slow_transfer_note(now, w)) {
            Some(note) => Some(line.with_note(note)),
            None => Some(line),
        }
    }

    /// 找出下载时间最长、超过宽限期且被 `watch` 认可的条目，返回 `[slug NN%]`。
    pub fn slow_transfer_note(
        &mut self,
        now: Instant,
        watch: &dyn Fn(&str) -> bool,
    ) -> Option<String> {
        let grace = self.grace;
        let record = self
            .in_flight
            .values_mut()
            .filter(|r| now.saturating_duration_since(r.started_at) > grace)
            .filter(|r| watch(r.slug.as_str()))
            .min_by(|a, b| {
                a.started_at
                    .cmp(&b.started_at)
                    .then_with(|| a.slug.cmp(&b.slug))
            })?;

        let total = *record
            .total_size
            .get_or_insert_with(|| self.probe.size_of(&record.download_url));

        // 大小为 0 与未知同样处理
        let percent = total.filter(|&total| total > 0).map(|total| {
            let local = fs::metadata(&record.download_path)
                .map(|m| m.len())
                .unwrap_or(0);
            local.saturating_mul(100) / total
        });

        Some(match percent {
            Some(p) => format!("[{} {p}%]", record.slug),
            None => format!("[{}]", record.slug),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct CountingProbe {
        size: Option<u64>,
        calls: Cell<usize>,
    }

    impl SizeProbe for CountingProbe {
        fn size_of(&self, _url: &str) -> Option<u64> {
            self.calls.set(self.calls.get() + 1);
            self.size
        }
    }

    fn start(slug: &str, path: PathBuf) -> Event {
        Event::Start {
            slug: slug.into(),
            download_path: path,
            download_url: format!("https://downloads.example/{slug}.zip"),
        }
    }

    fn any(_: &str) -> bool {
        true
    }

    #[test]
    fn percent_is_padded_to_six() {
        assert_eq!(format_percent(50.0), " 50.0%");
        assert_eq!(format_percent(100.0), "100.0%");
        assert_eq!(format_percent(3.04), "  3.0%");
    }

    #[test]
    fn terminal_events_render_status_lines() {
        let mut t = ProgressTracker::new(NoProbe);
        let now = Instant::now();
        let stats = SyncStats {
            total: 8,
            updated: 3,
            failed: 1,
        };
        assert!(t.observe(&start("akismet", "x".into()), &stats, now, None).is_none());
        assert_eq!(t.in_flight(), 1);

        let line = t
            .observe(&Event::Done { slug: "akismet".into() }, &stats, now, None)
            .unwrap();
        assert_eq!(line.render(0), "[ OK ]  50.0%  akismet");
        assert_eq!(t.in_flight(), 0);

        let line = t
            .observe(&Event::Fail { slug: "jetpack".into() }, &stats, now, None)
            .unwrap();
        assert_eq!(line.to_string(), "[FAIL]  50.0%  jetpack");
    }

    #[test]
    fn slow_item_is_probed_once_and_reports_percentage() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("big.zip");
        fs::write(&partial, vec![0u8; 250]).unwrap();

        let probe = CountingProbe {
            size: Some(1000),
            calls: Cell::new(0),
        };
        let mut t = ProgressTracker::new(probe);
        let t0 = Instant::now();
        let stats = SyncStats::new(10);
        t.observe(&start("big", partial.clone()), &stats, t0, Some(&any));

        // inside the grace period: no note, no probe
        let line = t
            .observe(
                &Event::Done { slug: "small".into() },
                &stats,
                t0 + Duration::from_secs(30),
                Some(&any),
            )
            .unwrap();
        assert_eq!(line.note, None);
        assert_eq!(t.probe.calls.get(), 0);

        let later = t0 + Duration::from_secs(31);
        let line = t
            .observe(&Event::Done { slug: "other".into() }, &stats, later, Some(&any))
            .unwrap();
        assert_eq!(line.note.as_deref(), Some("[big 25%]"));

        fs::write(&partial, vec![0u8; 999]).unwrap();
        let line = t
            .observe(&Event::Fail { slug: "third".into() }, &stats, later, Some(&any))
            .unwrap();
        assert_eq!(line.note.as_deref(), Some("[big 99%]"));
        assert_eq!(t.probe.calls.get(), 1);
    }

    #[test]
    fn unknown_size_still_names_the_slow_item() {
        let mut t = ProgressTracker::new(NoProbe);
        let t0 = Instant::now();
        let stats = SyncStats::new(2);
        t.observe(&start("big", "/nonexistent/big.zip".into()), &stats, t0, None);
        let line = t
            .observe(
                &Event::Done { slug: "a".into() },
                &stats,
                t0 + Duration::from_secs(60),
                Some(&any),
            )
            .unwrap();
        assert_eq!(line.note.as_deref(), Some("[big]"));
    }

    #[test]
    fn zero_size_is_treated_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("big.zip");
        fs::write(&partial, vec![0u8; 10]).unwrap();

        let probe = CountingProbe {
            size: Some(0),
            calls: Cell::new(0),
        };
        let mut t = ProgressTracker::new(probe);
        let t0 = Instant::now();
        let stats = SyncStats::new(2);
        t.observe(&start("big", partial), &stats, t0, None);
        let line = t
            .observe(
                &Event::Done { slug: "a".into() },
                &stats,
                t0 + Duration::from_secs(60),
                Some(&any),
            )
            .unwrap();
        assert_eq!(line.note.as_deref(), Some("[big]"));
        assert_eq!(t.probe.calls.get(), 1);
    }

    #[test]
    fn watch_filter_limits_candidates() {
        let mut t = ProgressTracker::new(NoProbe);
        let t0 = Instant::now();
        let stats = SyncStats::new(3);
        t.observe(&start("ignored", "a".into()), &stats, t0, None);
        let only_wanted = |slug: &str| slug == "wanted";
        let line = t
            .observe(
                &Event::Done { slug: "x".into() },
                &stats,
                t0 + Duration::from_secs(45),
                Some(&only_wanted),
            )
            .unwrap();
        assert_eq!(line.note, None);
    }

    #[test]
    fn narrow_width_drops_the_note() {
        let line = ProgressLine {
            status: LineStatus::Ok,
            percent: 12.5,
            slug: "akismet".into(),
            note: Some("-> local copy now at r3000000".into()),
        };
        assert_eq!(line.render(30), "[ OK ]  12.5%  akismet");
        assert_eq!(
            line.render(80),
            "[ OK ]  12.5%  akismet  -> local copy now at r3000000"
        );
    }

    #[test]
    fn http_probe_swallows_rejections() {
        let mut server = mockito::Server::new();
        let missing = server.mock("HEAD", "/gone.zip").with_status(404).create();
        let empty = server.mock("HEAD", "/empty.zip").with_status(200).create();

        let probe = HttpSizeProbe::new(Duration::from_secs(5)).unwrap();
        assert_eq!(probe.size_of(&format!("{}/gone.zip", server.url())), None);
        assert_eq!(probe.size_of(&format!("{}/empty.zip", server.url())), None);
        assert_eq!(probe.size_of("http://127.0.0.1:9/unreachable.zip"), None);

        missing.assert();
        empty.assert();
    }
}
