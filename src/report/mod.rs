//! 扫描结果汇总：把 `grep -r` 之类的扫描输出按插件分组计数，结合活跃安装数排序输出表格。

use std::collections::HashMap;
use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub plugin: String,
    pub matches: usize,
    pub installs: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ScanSummary {
    pub rows: Vec<ScanRow>,
    name_width: usize,
}

fn plugin_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:plugins/[^/]/)?([^/]+)/").unwrap_or_else(|e| panic!("bad regex: {e}"))
    })
}

impl ScanSummary {
    /// 连续出现的同一插件合并为一行；同一插件不相邻出现时会产生多行。
    pub fn from_lines<R: BufRead>(
        reader: R,
        installs: &HashMap<String, u64>,
    ) -> std::io::Result<Self> {
        let mut summary = ScanSummary::default();
        let mut current: Option<(String, usize)> = None;

        for line in reader.lines() {
            let line = line?;
            let Some(caps) = plugin_path_re().captures(&line) else {
                continue;
            };
            let plugin = &caps[1];
            if let Some((name, count)) = current.as_mut()
                && name.as_str() == plugin
            {
                *count += 1;
                continue;
            }
            if let Some((name, count)) = current.take() {
                summary.push(name, count, installs);
            }
            current = Some((plugin.to_string(), 1));
        }
        if let Some((name, count)) = current {
            summary.push(name, count, installs);
        }

        summary.rows.sort_by(|a, b| b.installs.cmp(&a.installs));
        Ok(summary)
    }

    fn push(&mut self, plugin: String, matches: usize, installs: &HashMap<String, u64>) {
        self.name_width = self.name_width.max(plugin.len());
        let installs = installs.get(&plugin).copied().unwrap_or(0);
        self.rows.push(ScanRow {
            plugin,
            matches,
            installs,
        });
    }

    pub fn count_line(&self) -> String {
        let n = self.rows.len();
        format!("{n} matching plugin{}", if n == 1 { "" } else { "s" })
    }

    pub fn render(&self) -> String {
        let header_pad = self.name_width.saturating_sub(3);
        let mut out = String::new();
        out.push_str(&format!(
            "Matches  {:<header_pad$}Active installs\n",
            "Plugin"
        ));
        out.push_str(&format!(
            "=======  {:<header_pad$}===============\n",
            "======"
        ));
        for row in &self.rows {
            // 安装数为 0 说明目录 API 中已不存在该插件
            let installs = if row.installs > 0 {
                format!("{:>9}+", group_thousands(row.installs))
            } else {
                "   REMOVED".to_string()
            };
            out.push_str(&format!(
                "{:>7}  {:<width$}  {installs}\n",
                row.matches,
                row.plugin,
                width = self.name_width
            ));
        }
        out
    }
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(5_000_000), "5,000,000");
    }

    #[test]
    fn renders_sorted_table() {
        let scan = "\
plugins/a/akismet/akismet.php:12:eval(
plugins/a/akismet/class.php:40:eval(
hello-dolly/hello.php:3:eval(
plugins/g/gone/gone.php:1:eval(
not a path
";
        let installs = HashMap::from([
            ("akismet".to_string(), 5_000_000),
            ("hello-dolly".to_string(), 200_000),
        ]);
        let summary = ScanSummary::from_lines(scan.as_bytes(), &installs).unwrap();
        assert_eq!(summary.count_line(), "3 matching plugins");

        let expected = "\
Matches  Plugin  Active installs
=======  ======  ===============
      2  akismet      5,000,000+
      1  hello-dolly    200,000+
      1  gone            REMOVED
";
        assert_eq!(summary.render(), expected);
    }

    #[test]
    fn single_match_uses_singular() {
        let summary =
            ScanSummary::from_lines("x/y.php:1:z\n".as_bytes(), &HashMap::new()).unwrap();
        assert_eq!(summary.count_line(), "1 matching plugin");
    }
}
