//! Comparison report: aggregation of two lane results and its text, JSON and
//! HTML renderings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::diff::{diff_files, read_or_empty, unified_diff};
use crate::lane::Lane;
use crate::smoke::{SmokeResult, SMOKE_DIR};
use crate::updater::LOCKFILE_DIFF;

pub const REPORT_TXT: &str = "report.txt";
pub const REPORT_JSON: &str = "report.json";
pub const REPORT_HTML: &str = "report.html";

const NO_DIFFERENCES: &str = "(no differences)";
const NO_CHANGES: &str = "(no changes)";

/// Overall verdict derived from the two lanes' success flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Both lanes passed.
    Pass,
    /// Baseline passed, candidate failed.
    Regression,
    /// Both lanes failed.
    BaselineBroken,
    /// Baseline failed, candidate passed.
    Fail,
}

impl Classification {
    pub fn classify(before_success: bool, after_success: bool) -> Self {
        match (before_success, after_success) {
            (true, true) => Classification::Pass,
            (true, false) => Classification::Regression,
            (false, false) => Classification::BaselineBroken,
            (false, true) => Classification::Fail,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Pass => "pass",
            Classification::Regression => "regression",
            Classification::BaselineBroken => "baseline_broken",
            Classification::Fail => "fail",
        }
    }
}

/// How one smoke output file differs between the lanes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmokeOutputChange {
    /// Present in both; unified diff (empty when identical).
    Diff(String),
    /// Only the after lane produced it; its content.
    Added(String),
    /// Only the before lane produced it.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeOutputDiff {
    /// Path relative to the lane's `smoke/` directory.
    pub relative_path: String,
    /// Display name: file stem with underscores as spaces, capitalized.
    pub label: String,
    pub change: SmokeOutputChange,
}

impl SmokeOutputDiff {
    /// Body text for the report; empty when the two files match.
    pub fn rendered(&self) -> String {
        match &self.change {
            SmokeOutputChange::Diff(diff) => diff.clone(),
            SmokeOutputChange::Added(content) => format!("  (new file in after)\n{content}"),
            SmokeOutputChange::Missing => "  (missing in after)".to_string(),
        }
    }

    /// Key used in the JSON report.
    pub fn key(&self) -> String {
        let path = Path::new(&self.relative_path);
        let stem = path.with_extension("");
        stem.to_string_lossy().to_lowercase().replace(' ', "_")
    }
}

/// Everything known about one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub identifier: String,
    pub before: SmokeResult,
    pub after: SmokeResult,
    /// `after.elapsed - before.elapsed` in seconds.
    pub elapsed_delta: f64,
    pub stdout_diff: String,
    pub stderr_diff: String,
    /// `None` when no lockfile diff was recorded for this run.
    pub lockfile_diff: Option<String>,
    pub smoke_outputs: Vec<SmokeOutputDiff>,
    pub classification: Classification,
    pub artifact_root: PathBuf,
    pub generated_at: DateTime<Utc>,
}

impl ComparisonReport {
    /// Aggregate two lane results. Lane artifacts are read from
    /// `artifact_root`; absent files count as empty.
    pub fn build(
        identifier: &str,
        before: SmokeResult,
        after: SmokeResult,
        artifact_root: &Path,
    ) -> Self {
        let lockfile_path = artifact_root.join(LOCKFILE_DIFF);
        let lockfile_diff = lockfile_path
            .is_file()
            .then(|| read_or_empty(&lockfile_path));

        Self {
            identifier: identifier.to_string(),
            elapsed_delta: after.elapsed - before.elapsed,
            stdout_diff: unified_diff(
                &before.stdout,
                &after.stdout,
                "before/stdout.log",
                "after/stdout.log",
            ),
            stderr_diff: unified_diff(
                &before.stderr,
                &after.stderr,
                "before/stderr.log",
                "after/stderr.log",
            ),
            lockfile_diff,
            smoke_outputs: collect_smoke_outputs(artifact_root),
            classification: Classification::classify(before.success, after.success),
            before,
            after,
            artifact_root: artifact_root.to_path_buf(),
            generated_at: Utc::now(),
        }
    }

    /// Plain-text report.
    pub fn render_text(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        out.push_str(&format!("{rule}\nsmokepair report: {}\n{rule}\n\n", self.identifier));

        out.push_str("## Timing\n");
        out.push_str(&format!("  Before: {:.3}s\n", self.before.elapsed));
        out.push_str(&format!("  After:  {:.3}s\n", self.after.elapsed));
        out.push_str(&format!("  Diff:   {}\n\n", signed_seconds(self.elapsed_delta)));

        out.push_str("## Exit Status\n");
        out.push_str(&format!("  Before: {}\n", ok_label(self.before.success)));
        out.push_str(&format!("  After:  {}\n", ok_label(self.after.success)));
        out.push_str(&format!("  Result: {}\n\n", self.classification.as_str()));

        text_section(&mut out, "Stdout Diff", &self.stdout_diff, NO_DIFFERENCES);
        text_section(&mut out, "Stderr Diff", &self.stderr_diff, NO_DIFFERENCES);
        for output in &self.smoke_outputs {
            text_section(
                &mut out,
                &format!("{} Diff", output.label),
                &output.rendered(),
                NO_DIFFERENCES,
            );
        }
        if let Some(lockfile) = &self.lockfile_diff {
            text_section(&mut out, "Lockfile Diff", lockfile, NO_CHANGES);
        }

        out.push_str(&format!("Artifacts saved to: {}\n", self.artifact_root.display()));
        out
    }

    /// Machine-readable summary.
    pub fn to_json(&self) -> JsonReport {
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());
        let smoke_outputs = self
            .smoke_outputs
            .iter()
            .map(|o| (o.key(), non_empty(&o.rendered())))
            .collect();

        JsonReport {
            version: "1.0".to_string(),
            identifier: self.identifier.clone(),
            generated_at: self.generated_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            result: self.classification,
            before: LaneSummary::from(&self.before),
            after: LaneSummary::from(&self.after),
            diffs: JsonDiffs {
                stdout: non_empty(&self.stdout_diff),
                stderr: non_empty(&self.stderr_diff),
                lockfile: self.lockfile_diff.as_deref().and_then(non_empty),
                smoke_outputs,
            },
        }
    }

    /// Self-contained HTML report.
    pub fn render_html(&self) -> String {
        let identifier = escape_html(&self.identifier);
        let mut sections = vec![
            html_diff_section("Stdout Diff", &self.stdout_diff),
            html_diff_section("Stderr Diff", &self.stderr_diff),
        ];
        for output in &self.smoke_outputs {
            sections.push(html_diff_section(
                &format!("{} Diff", output.label),
                &output.rendered(),
            ));
        }
        if let Some(lockfile) = &self.lockfile_diff {
            sections.push(html_diff_section("Lockfile Diff", lockfile));
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n\
             <meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n\
             <title>smokepair report: {identifier}</title>\n<style>{css}</style>\n</head>\n<body>\n\
             <div class=\"container\">\n\
             <header>\n<h1>smokepair report: {identifier}</h1>\n\
             <p class=\"timestamp\">Generated at {generated}</p>\n</header>\n\
             {performance}{status}{sections}\
             <footer>Artifacts saved to: {root}</footer>\n</div>\n</body>\n</html>\n",
            css = CSS,
            generated = self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            performance = self.html_performance(),
            status = self.html_status(),
            sections = sections.concat(),
            root = escape_html(&self.artifact_root.display().to_string()),
        )
    }

    fn html_performance(&self) -> String {
        let before = self.before.elapsed;
        let after = self.after.elapsed;
        let max = before.max(after).max(0.001);
        let percent_of_max = |t: f64| (t / max * 1000.0).round() / 10.0;
        let delta_pct = if before == 0.0 {
            0.0
        } else {
            (self.elapsed_delta / before * 1000.0).round() / 10.0
        };
        let (sign, class) = if self.elapsed_delta >= 0.0 {
            ("+", "slower")
        } else {
            ("", "faster")
        };

        format!(
            "<section>\n<h2>Performance</h2>\n<div class=\"chart\">\n\
             {before_row}{after_row}</div>\n\
             <p class=\"diff-summary {class}\">Difference: {sign}{delta:.3}s ({sign}{delta_pct}%)</p>\n\
             </section>\n",
            before_row = chart_row("Before", "bar-before", percent_of_max(before), before),
            after_row = chart_row("After", "bar-after", percent_of_max(after), after),
            delta = self.elapsed_delta,
        )
    }

    fn html_status(&self) -> String {
        let badge = |name: &str, success: bool| {
            let (class, label) = if success {
                ("badge-pass", "PASS")
            } else {
                ("badge-fail", "FAIL")
            };
            format!("<span class=\"badge {class}\">{name}: {label}</span>\n")
        };
        format!(
            "<section>\n<h2>Exit Status</h2>\n<div class=\"badges\">\n{}{}</div>\n\
             <p class=\"result result-{result}\">Result: {result}</p>\n</section>\n",
            badge("Before", self.before.success),
            badge("After", self.after.success),
            result = self.classification.as_str(),
        )
    }

    /// Write `report.txt`, `report.json` and `report.html` into `dir`.
    pub fn write_all(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join(REPORT_TXT), self.render_text())?;
        let json = serde_json::to_string_pretty(&self.to_json())?;
        std::fs::write(dir.join(REPORT_JSON), json)?;
        std::fs::write(dir.join(REPORT_HTML), self.render_html())?;
        Ok(())
    }
}

/// Shape of `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonReport {
    pub version: String,
    pub identifier: String,
    pub generated_at: String,
    pub result: Classification,
    pub before: LaneSummary,
    pub after: LaneSummary,
    pub diffs: JsonDiffs,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaneSummary {
    pub success: bool,
    /// Seconds, rounded to milliseconds.
    pub elapsed: f64,
}

impl From<&SmokeResult> for LaneSummary {
    fn from(result: &SmokeResult) -> Self {
        Self {
            success: result.success,
            elapsed: (result.elapsed * 1000.0).round() / 1000.0,
        }
    }
}

/// Diff texts; `None` serializes as `null` and means no difference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonDiffs {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub lockfile: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub smoke_outputs: BTreeMap<String, Option<String>>,
}

fn collect_smoke_outputs(artifact_root: &Path) -> Vec<SmokeOutputDiff> {
    let before_dir = artifact_root.join(Lane::Before.as_str()).join(SMOKE_DIR);
    let after_dir = artifact_root.join(Lane::After.as_str()).join(SMOKE_DIR);
    if !before_dir.is_dir() || !after_dir.is_dir() {
        return Vec::new();
    }

    let mut relative: BTreeSet<String> = relative_files(&before_dir);
    relative.extend(relative_files(&after_dir));

    relative
        .into_iter()
        .map(|rel| {
            let before_path = before_dir.join(&rel);
            let after_path = after_dir.join(&rel);
            let change = match (before_path.is_file(), after_path.is_file()) {
                (true, true) => SmokeOutputChange::Diff(diff_files(
                    &before_path,
                    &after_path,
                    &format!("before/{SMOKE_DIR}/{rel}"),
                    &format!("after/{SMOKE_DIR}/{rel}"),
                )),
                (false, _) => SmokeOutputChange::Added(read_or_empty(&after_path)),
                (true, false) => SmokeOutputChange::Missing,
            };
            SmokeOutputDiff {
                label: output_label(&rel),
                relative_path: rel,
                change,
            }
        })
        .collect()
}

fn relative_files(dir: &Path) -> BTreeSet<String> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
        })
        .collect()
}

/// `"db_queries.txt"` becomes `"Db queries"`.
fn output_label(relative: &str) -> String {
    let stem = Path::new(relative)
        .file_stem()
        .map(|s| s.to_string_lossy().replace('_', " "))
        .unwrap_or_default();
    let mut chars = stem.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn ok_label(success: bool) -> &'static str {
    if success {
        "OK"
    } else {
        "FAILED"
    }
}

fn signed_seconds(delta: f64) -> String {
    if delta >= 0.0 {
        format!("+{delta:.3}s")
    } else {
        format!("{delta:.3}s")
    }
}

fn text_section(out: &mut String, title: &str, body: &str, placeholder: &str) {
    out.push_str(&format!("## {title}\n"));
    if body.is_empty() {
        out.push_str(&format!("  {placeholder}\n"));
    } else {
        out.push_str(body);
        if !body.ends_with('\n') {
            out.push('\n');
        }
    }
    out.push('\n');
}

fn chart_row(label: &str, class: &str, width_pct: f64, seconds: f64) -> String {
    format!(
        "<div class=\"chart-row\"><span class=\"chart-label\">{label}</span>\
         <div class=\"bar-container\"><div class=\"bar {class}\" style=\"width: {width_pct}%\"></div></div>\
         <span class=\"chart-value\">{seconds:.3}s</span></div>\n"
    )
}

fn html_diff_section(title: &str, body: &str) -> String {
    let content = if body.is_empty() {
        format!("<p class=\"no-diff\">{NO_DIFFERENCES}</p>")
    } else {
        format!("<pre class=\"diff\">{}</pre>", style_diff(body))
    };
    format!(
        "<details>\n<summary>{}</summary>\n{content}\n</details>\n",
        escape_html(title)
    )
}

fn style_diff(diff: &str) -> String {
    diff.lines()
        .map(|line| {
            let escaped = escape_html(line);
            if line.starts_with("@@") {
                format!("<span class=\"diff-hunk\">{escaped}</span>")
            } else if line.starts_with('+') {
                format!("<span class=\"diff-add\">{escaped}</span>")
            } else if line.starts_with('-') {
                format!("<span class=\"diff-del\">{escaped}</span>")
            } else {
                escaped
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

const CSS: &str = "\
* { margin: 0; padding: 0; box-sizing: border-box; }
body { font-family: -apple-system, BlinkMacSystemFont, \"Segoe UI\", Roboto, sans-serif; background: #f5f5f5; color: #333; padding: 2rem; }
.container { max-width: 900px; margin: 0 auto; }
header { margin-bottom: 2rem; }
h1 { font-size: 1.5rem; margin-bottom: 0.25rem; }
.timestamp { color: #888; font-size: 0.85rem; }
h2 { font-size: 1.2rem; margin-bottom: 0.75rem; border-bottom: 1px solid #ddd; padding-bottom: 0.25rem; }
section { background: #fff; border-radius: 8px; padding: 1.25rem; margin-bottom: 1rem; }
.chart-row { display: flex; align-items: center; margin-bottom: 0.5rem; }
.chart-label { width: 60px; font-weight: 600; }
.bar-container { flex: 1; background: #eee; border-radius: 4px; height: 24px; margin: 0 0.75rem; overflow: hidden; }
.bar { height: 100%; }
.bar-before { background: #6c9bd2; }
.bar-after { background: #f0a860; }
.chart-value { width: 80px; text-align: right; font-variant-numeric: tabular-nums; }
.diff-summary { font-weight: 600; }
.diff-summary.slower { color: #c0392b; }
.diff-summary.faster { color: #27ae60; }
.badges { display: flex; gap: 0.75rem; margin-bottom: 0.5rem; }
.badge { padding: 0.35rem 1rem; border-radius: 4px; font-weight: 600; }
.badge-pass { background: #d4edda; color: #155724; }
.badge-fail { background: #f8d7da; color: #721c24; }
details { background: #fff; border-radius: 8px; padding: 1rem 1.25rem; margin-bottom: 1rem; }
summary { cursor: pointer; font-weight: 600; }
.diff { background: #fafafa; border: 1px solid #e0e0e0; padding: 0.75rem; font-family: monospace; font-size: 0.82rem; overflow-x: auto; }
.diff-add { background: #e6ffec; color: #22863a; display: block; }
.diff-del { background: #ffeef0; color: #b31d28; display: block; }
.diff-hunk { background: #f1f8ff; color: #005cc5; display: block; }
.no-diff { color: #888; font-style: italic; }
footer { color: #888; font-size: 0.85rem; margin-top: 1.5rem; }
";
