//! Line-based unified diffs.
//!
//! Lines are aligned with a longest-common-subsequence table after trimming
//! the common prefix and suffix. Inputs whose remaining middle would need more
//! than [`MAX_TABLE_CELLS`] cells are emitted as one delete-all/insert-all
//! block instead.

use std::path::Path;

/// Lines of unchanged context around each change.
pub const CONTEXT_LINES: usize = 3;

/// Upper bound on the alignment table size.
pub const MAX_TABLE_CELLS: usize = 4_000_000;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal,
    Delete,
    Insert,
}

/// Unified diff of two texts, or the empty string when they are identical.
pub fn unified_diff(before: &str, after: &str, before_label: &str, after_label: &str) -> String {
    if before == after {
        return String::new();
    }

    let a: Vec<&str> = before.split_inclusive('\n').collect();
    let b: Vec<&str> = after.split_inclusive('\n').collect();
    let edits = align(&a, &b);

    let mut out = format!("--- {before_label}\n+++ {after_label}\n");
    for hunk in hunks(&edits) {
        render_hunk(&mut out, &edits, hunk);
    }
    out
}

/// Diff two files. A file that does not exist or cannot be read counts as
/// empty.
pub fn diff_files(before: &Path, after: &Path, before_label: &str, after_label: &str) -> String {
    unified_diff(
        &read_or_empty(before),
        &read_or_empty(after),
        before_label,
        after_label,
    )
}

/// File contents, or an empty string when the file is absent.
pub fn read_or_empty(path: &Path) -> String {
    std::fs::read(path)
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

/// An edit script step: operation, line text, and the 0-based positions in
/// the old and new sequences before the step is applied.
#[derive(Debug, Clone, Copy)]
struct Edit<'a> {
    op: Op,
    line: &'a str,
    old_pos: usize,
    new_pos: usize,
}

fn align<'a>(a: &[&'a str], b: &[&'a str]) -> Vec<Edit<'a>> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];

    let mut ops: Vec<Op> = Vec::with_capacity(a.len() + b.len());
    ops.extend(std::iter::repeat(Op::Equal).take(prefix));
    ops.extend(middle_ops(a_mid, b_mid));
    ops.extend(std::iter::repeat(Op::Equal).take(suffix));

    let mut edits = Vec::with_capacity(ops.len());
    let (mut i, mut j) = (0, 0);
    for op in ops {
        let line = match op {
            Op::Insert => b[j],
            _ => a[i],
        };
        edits.push(Edit {
            op,
            line,
            old_pos: i,
            new_pos: j,
        });
        match op {
            Op::Equal => {
                i += 1;
                j += 1;
            }
            Op::Delete => i += 1,
            Op::Insert => j += 1,
        }
    }
    edits
}

fn middle_ops(a: &[&str], b: &[&str]) -> Vec<Op> {
    let m = a.len();
    let n = b.len();

    if m == 0 || n == 0 || m.saturating_mul(n) > MAX_TABLE_CELLS {
        let mut ops = vec![Op::Delete; m];
        ops.extend(std::iter::repeat(Op::Insert).take(n));
        return ops;
    }

    // lcs[i * width + j] = LCS length of a[i..] and b[j..]
    let width = n + 1;
    let mut lcs = vec![0u32; (m + 1) * width];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i * width + j] = if a[i] == b[j] {
                lcs[(i + 1) * width + j + 1] + 1
            } else {
                lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(m + n);
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if a[i] == b[j] {
            ops.push(Op::Equal);
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * width + j] >= lcs[i * width + j + 1] {
            ops.push(Op::Delete);
            i += 1;
        } else {
            ops.push(Op::Insert);
            j += 1;
        }
    }
    ops.extend(std::iter::repeat(Op::Delete).take(m - i));
    ops.extend(std::iter::repeat(Op::Insert).take(n - j));
    ops
}

/// Group changed edits into `[start, end)` ranges with surrounding context.
fn hunks(edits: &[Edit<'_>]) -> Vec<(usize, usize)> {
    let changes: Vec<usize> = edits
        .iter()
        .enumerate()
        .filter(|(_, e)| e.op != Op::Equal)
        .map(|(k, _)| k)
        .collect();

    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for &k in &changes {
        let start = k.saturating_sub(CONTEXT_LINES);
        let end = (k + 1 + CONTEXT_LINES).min(edits.len());
        match ranges.last_mut() {
            Some(last) if start <= last.1 => last.1 = end,
            _ => ranges.push((start, end)),
        }
    }
    ranges
}

fn render_hunk(out: &mut String, edits: &[Edit<'_>], (start, end): (usize, usize)) {
    let slice = &edits[start..end];
    let old_len = slice.iter().filter(|e| e.op != Op::Insert).count();
    let new_len = slice.iter().filter(|e| e.op != Op::Delete).count();

    out.push_str(&format!(
        "@@ -{} +{} @@\n",
        range_label(slice[0].old_pos, old_len),
        range_label(slice[0].new_pos, new_len)
    ));

    for edit in slice {
        out.push(match edit.op {
            Op::Equal => ' ',
            Op::Delete => '-',
            Op::Insert => '+',
        });
        out.push_str(edit.line);
        if !edit.line.ends_with('\n') {
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
        }
    }
}

fn range_label(start: usize, len: usize) -> String {
    match len {
        0 => format!("{start},0"),
        1 => format!("{}", start + 1),
        _ => format!("{},{}", start + 1, len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_empty_diff() {
        assert_eq!(unified_diff("a\nb\n", "a\nb\n", "x", "y"), "");
        assert_eq!(unified_diff("", "", "x", "y"), "");
    }

    #[test]
    fn single_line_change() {
        let diff = unified_diff("hello\n", "hello world\n", "before", "after");
        assert!(diff.starts_with("--- before\n+++ after\n"));
        assert!(diff.contains("-hello\n"));
        assert!(diff.contains("+hello world\n"));
        assert!(diff.contains("@@ -1 +1 @@\n"));
    }

    #[test]
    fn context_is_limited_to_three_lines() {
        let before: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        let after = before.replace("line5\n", "LINE5\n");
        let diff = unified_diff(&before, &after, "a", "b");

        assert!(diff.contains("@@ -2,7 +2,7 @@\n"));
        assert!(diff.contains(" line2\n"));
        assert!(diff.contains(" line8\n"));
        assert!(!diff.contains("line1\n"));
        assert!(!diff.contains("line9\n"));
    }

    #[test]
    fn distant_changes_form_separate_hunks() {
        let before: String = (1..=20).map(|i| format!("l{i}\n")).collect();
        let after = before.replace("l2\n", "x2\n").replace("l18\n", "x18\n");
        let diff = unified_diff(&before, &after, "a", "b");
        assert_eq!(diff.matches("@@ -").count(), 2);
    }

    #[test]
    fn insertion_into_empty_text() {
        let diff = unified_diff("", "new\n", "a", "b");
        assert!(diff.contains("@@ -0,0 +1 @@\n+new\n"));
    }

    #[test]
    fn deletion_to_empty_text() {
        let diff = unified_diff("one\ntwo\n", "", "a", "b");
        assert!(diff.contains("@@ -1,2 +0,0 @@\n-one\n-two\n"));
    }

    #[test]
    fn missing_trailing_newline_is_marked() {
        let diff = unified_diff("a\n", "a\nb", "x", "y");
        assert!(diff.contains("+b\n\\ No newline at end of file\n"));
    }

    #[test]
    fn lockfile_style_change() {
        let before = "GEM\n  specs:\n    rails (7.1.0)\n    rack (3.0.0)\n\nBUNDLED WITH\n   2.5.0\n";
        let after = "GEM\n  specs:\n    rails (7.2.0)\n    rack (3.0.0)\n\nBUNDLED WITH\n   2.5.0\n";
        let diff = unified_diff(before, after, "before/Gemfile.lock", "after/Gemfile.lock");
        assert!(diff.contains("-    rails (7.1.0)\n+    rails (7.2.0)\n"));
        assert!(diff.contains("     rack (3.0.0)\n"));
    }

    #[test]
    fn diff_files_treats_missing_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.txt");
        std::fs::write(&present, "content\n").unwrap();
        let diff = diff_files(&dir.path().join("absent.txt"), &present, "a", "b");
        assert!(diff.contains("+content\n"));
    }
}
