//! `git status --porcelain=v1` parsing and classification

use std::collections::BTreeMap;

use serde::Serialize;

/// Coarse bucket for one status record, in descending severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCategory {
    Conflicted,
    Staged,
    Modified,
    Untracked,
    Ignored,
}

impl std::fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Conflicted => "conflicted",
            Self::Staged => "staged",
            Self::Modified => "modified",
            Self::Untracked => "untracked",
            Self::Ignored => "ignored",
        };
        f.write_str(name)
    }
}

/// One porcelain line: `XY path` or `XY orig -> path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusRecord {
    /// Index (staging area) column.
    pub index: char,
    /// Working tree column.
    pub worktree: char,
    pub path: String,
    /// Source path of a rename or copy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orig_path: Option<String>,
}

impl StatusRecord {
    pub fn new(index: char, worktree: char, path: impl Into<String>) -> Self {
        Self {
            index,
            worktree,
            path: path.into(),
            orig_path: None,
        }
    }

    /// Parse a single porcelain v1 line. Returns `None` for blank or
    /// malformed lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut chars = line.chars();
        let index = chars.next()?;
        let worktree = chars.next()?;
        if chars.next()? != ' ' {
            return None;
        }
        let rest = chars.as_str();
        if rest.is_empty() {
            return None;
        }

        let (orig_path, path) = match split_rename(rest) {
            Some((from, to)) if matches!(index, 'R' | 'C') || matches!(worktree, 'R' | 'C') => {
                (Some(unquote(from)), unquote(to))
            }
            _ => (None, unquote(rest)),
        };

        Some(Self {
            index,
            worktree,
            path,
            orig_path,
        })
    }

    /// The two-letter status code, e.g. `" M"` or `"UU"`.
    pub fn code(&self) -> String {
        format!("{}{}", self.index, self.worktree)
    }

    /// Unmerged entries: either column `U`, or both-added / both-deleted.
    pub fn is_conflicted(&self) -> bool {
        self.index == 'U'
            || self.worktree == 'U'
            || matches!((self.index, self.worktree), ('A', 'A') | ('D', 'D'))
    }

    pub fn category(&self) -> StatusCategory {
        if self.is_conflicted() {
            StatusCategory::Conflicted
        } else if self.index == '?' {
            StatusCategory::Untracked
        } else if self.index == '!' {
            StatusCategory::Ignored
        } else if self.worktree == ' ' {
            StatusCategory::Staged
        } else {
            StatusCategory::Modified
        }
    }
}

fn split_rename(rest: &str) -> Option<(&str, &str)> {
    // Quoted paths escape their own quotes, so ` -> ` outside quotes is the
    // separator; a path containing the literal arrow is always quoted.
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in rest.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes && rest[i..].starts_with(" -> ") => {
                return Some((&rest[..i], &rest[i + 4..]));
            }
            _ => {}
        }
    }
    None
}

/// Undo git's C-style path quoting (`"a\tb"`, octal escapes for non-ASCII).
fn unquote(raw: &str) -> String {
    let Some(inner) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) else {
        return raw.to_string();
    };

    let mut bytes = Vec::with_capacity(inner.len());
    let mut iter = inner.bytes().peekable();
    while let Some(b) = iter.next() {
        if b != b'\\' {
            bytes.push(b);
            continue;
        }
        match iter.next() {
            Some(b'n') => bytes.push(b'\n'),
            Some(b't') => bytes.push(b'\t'),
            Some(b'r') => bytes.push(b'\r'),
            Some(b'a') => bytes.push(0x07),
            Some(b'b') => bytes.push(0x08),
            Some(b'f') => bytes.push(0x0c),
            Some(b'v') => bytes.push(0x0b),
            Some(d @ b'0'..=b'7') => {
                let mut value = u32::from(d - b'0');
                for _ in 0..2 {
                    match iter.peek() {
                        Some(&o @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(o - b'0');
                            iter.next();
                        }
                        _ => break,
                    }
                }
                bytes.push(value as u8);
            }
            Some(other) => bytes.push(other),
            None => bytes.push(b'\\'),
        }
    }
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Parse full porcelain output, skipping lines that do not parse.
pub fn parse_porcelain(output: &str) -> Vec<StatusRecord> {
    output
        .lines()
        .filter_map(|line| {
            let record = StatusRecord::parse_line(line);
            if record.is_none() && !line.trim().is_empty() {
                tracing::debug!(line, "Ignoring unparseable status line");
            }
            record
        })
        .collect()
}

/// Records grouped by category, with remediation advice.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub records: Vec<StatusRecord>,
    counts: BTreeMap<StatusCategory, usize>,
}

impl StatusSummary {
    pub fn from_records(records: Vec<StatusRecord>) -> Self {
        let mut counts = BTreeMap::new();
        for record in &records {
            *counts.entry(record.category()).or_insert(0) += 1;
        }
        Self { records, counts }
    }

    pub fn count(&self, category: StatusCategory) -> usize {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn has_conflicts(&self) -> bool {
        self.count(StatusCategory::Conflicted) > 0
    }

    /// Uncommitted work, not counting ignored files.
    pub fn uncommitted(&self) -> usize {
        self.counts
            .iter()
            .filter(|(category, _)| **category != StatusCategory::Ignored)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.uncommitted() == 0
    }

    pub fn conflicted_paths(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.is_conflicted())
            .map(|r| r.path.as_str())
            .collect()
    }

    /// One line per non-empty category, then the stash alternative.
    pub fn advice(&self) -> Vec<String> {
        let mut advice = Vec::new();
        let conflicted = self.count(StatusCategory::Conflicted);
        if conflicted > 0 {
            advice.push(format!(
                "{conflicted} conflicted file(s): resolve the conflicts, then `git add` them and commit"
            ));
        }
        let staged = self.count(StatusCategory::Staged);
        if staged > 0 {
            advice.push(format!(
                "{staged} staged change(s): commit them with `git commit`"
            ));
        }
        let modified = self.count(StatusCategory::Modified);
        if modified > 0 {
            advice.push(format!(
                "{modified} modified file(s) not staged: stage and commit with `git add -A && git commit`"
            ));
        }
        let untracked = self.count(StatusCategory::Untracked);
        if untracked > 0 {
            advice.push(format!(
                "{untracked} untracked file(s): add them to version control with `git add` or ignore them"
            ));
        }
        if !self.is_clean() && conflicted == 0 {
            advice.push(
                "Or set everything aside with `git stash push --include-untracked`".to_string(),
            );
        }
        advice
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("UU both.md", StatusCategory::Conflicted)]
    #[case("AU added_by_us.md", StatusCategory::Conflicted)]
    #[case("DD gone.md", StatusCategory::Conflicted)]
    #[case("AA twice.md", StatusCategory::Conflicted)]
    #[case("M  staged.md", StatusCategory::Staged)]
    #[case("A  new.md", StatusCategory::Staged)]
    #[case(" M edited.md", StatusCategory::Modified)]
    #[case("MM both_columns.md", StatusCategory::Modified)]
    #[case(" D deleted.md", StatusCategory::Modified)]
    #[case("?? fresh.md", StatusCategory::Untracked)]
    #[case("!! build/", StatusCategory::Ignored)]
    fn categorizes(#[case] line: &str, #[case] expected: StatusCategory) {
        let record = StatusRecord::parse_line(line).unwrap();
        assert_eq!(record.category(), expected);
    }

    #[test]
    fn parses_renames() {
        let record = StatusRecord::parse_line("R  old name.md -> new name.md").unwrap();
        assert_eq!(record.path, "new name.md");
        assert_eq!(record.orig_path.as_deref(), Some("old name.md"));
        assert_eq!(record.code(), "R ");
    }

    #[test]
    fn arrow_in_plain_path_is_not_a_rename() {
        let record = StatusRecord::parse_line("?? a -> b.md").unwrap();
        assert_eq!(record.path, "a -> b.md");
        assert_eq!(record.orig_path, None);
    }

    #[test]
    fn unquotes_escaped_paths() {
        let record = StatusRecord::parse_line(r#"?? "tab\there.md""#).unwrap();
        assert_eq!(record.path, "tab\there.md");

        let record = StatusRecord::parse_line(r#"?? "caf\303\251.md""#).unwrap();
        assert_eq!(record.path, "café.md");

        let record =
            StatusRecord::parse_line(r#"R  "quote\"d.md" -> "plain.md""#).unwrap();
        assert_eq!(record.orig_path.as_deref(), Some("quote\"d.md"));
        assert_eq!(record.path, "plain.md");
    }

    #[test]
    fn skips_malformed_lines() {
        let records = parse_porcelain(" M ok.md\n\nX\nMMno-space\n?? new.md\n");
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn summary_counts_and_advice() {
        let summary = StatusSummary::from_records(parse_porcelain(
            "M  a.md\n M b.md\n M c.md\n?? d.md\n!! target/\n",
        ));
        assert!(!summary.has_conflicts());
        assert_eq!(summary.uncommitted(), 4);
        insta::assert_snapshot!(summary.advice().join("\n"), @r"
        1 staged change(s): commit them with `git commit`
        2 modified file(s) not staged: stage and commit with `git add -A && git commit`
        1 untracked file(s): add them to version control with `git add` or ignore them
        Or set everything aside with `git stash push --include-untracked`
        ");
    }

    #[test]
    fn conflicts_suppress_stash_advice() {
        let summary = StatusSummary::from_records(parse_porcelain("UU x.md\n?? y.md\n"));
        assert!(summary.has_conflicts());
        assert_eq!(summary.conflicted_paths(), vec!["x.md"]);
        assert!(!summary.advice().iter().any(|a| a.contains("stash")));
    }

    #[test]
    fn ignored_only_is_clean() {
        let summary = StatusSummary::from_records(parse_porcelain("!! node_modules/\n"));
        assert!(summary.is_clean());
        assert!(summary.advice().is_empty());
    }
}
