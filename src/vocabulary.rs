//! Line-oriented vocabulary book parser.
//!
//! Each entry is one line: `word [phonetic] definition`. Blank lines,
//! comments, headings and separator lines are skipped.

use crate::error::{PregenError, Result};
use crate::item::WorkItem;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

static ENTRY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\S+)\s+\[([^\]]+)\]\s+(.+)$").expect("valid entry regex"));

static HEADING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z\s]+$").expect("valid heading regex"));

static SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[（）\d]+$").expect("valid separator regex"));

const MIN_LINE_CHARS: usize = 3;
const PREVIEW_CHARS: usize = 50;

/// Line counts from one parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseStats {
    /// Lines in the input.
    pub total_lines: usize,
    /// Entries produced.
    pub valid_words: usize,
    /// Blank, comment, heading and separator lines.
    pub skipped_lines: usize,
    /// Lines that did not match the entry format.
    pub error_lines: usize,
    /// Entries dropped because the word was already seen.
    pub duplicates: usize,
}

/// Parser output.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    /// Entries in file order, unique by key.
    pub items: Vec<WorkItem>,
    /// Line counts.
    pub stats: ParseStats,
}

impl Vocabulary {
    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no entry was found.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Keep only the first `limit` entries.
    pub fn truncate(&mut self, limit: usize) {
        self.items.truncate(limit);
    }
}

/// Read and parse the vocabulary file at `path`.
pub async fn parse_file(path: &Path) -> Result<Vocabulary> {
    let content =
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| PregenError::InputFileRead {
                path: path.to_path_buf(),
                source,
            })?;

    let vocabulary = parse_str(&content);
    info!(
        path = %path.display(),
        total_lines = vocabulary.stats.total_lines,
        valid = vocabulary.stats.valid_words,
        skipped = vocabulary.stats.skipped_lines,
        errors = vocabulary.stats.error_lines,
        duplicates = vocabulary.stats.duplicates,
        "Parsed vocabulary"
    );
    Ok(vocabulary)
}

/// Parse vocabulary text.
pub fn parse_str(content: &str) -> Vocabulary {
    let mut vocabulary = Vocabulary::default();
    let mut seen = HashSet::new();

    for (index, raw) in content.split('\n').enumerate() {
        let stats = &mut vocabulary.stats;
        stats.total_lines += 1;
        let line = raw.trim();

        if is_skippable(line) {
            stats.skipped_lines += 1;
            continue;
        }

        let Some(caps) = ENTRY.captures(line) else {
            warn!(
                line = index + 1,
                text = %preview(line),
                "Malformed vocabulary line"
            );
            stats.error_lines += 1;
            continue;
        };

        let word = caps[1].trim();
        if !seen.insert(word.to_string()) {
            warn!(line = index + 1, word, "Duplicate word skipped");
            stats.duplicates += 1;
            continue;
        }

        vocabulary
            .items
            .push(WorkItem::new(word, caps[2].trim(), caps[3].trim()));
        vocabulary.stats.valid_words += 1;
    }

    vocabulary
}

fn is_skippable(line: &str) -> bool {
    line.chars().count() < MIN_LINE_CHARS
        || line.starts_with('#')
        || line.starts_with("//")
        || HEADING.is_match(line)
        || SEPARATOR.is_match(line)
}

fn preview(line: &str) -> String {
    line.chars().take(PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOOK: &str = "\
CET FOUR
# comment
// another
（1）
abandon [əˈbændən] v. 放弃；抛弃
ability [əˈbɪləti] n. 能力
no brackets here
abandon [x] duplicate

食べる [たべる] 吃
";

    #[test]
    fn test_parse_book() {
        let vocabulary = parse_str(BOOK);
        let keys: Vec<_> = vocabulary.items.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["abandon", "ability", "食べる"]);

        let first = &vocabulary.items[0];
        assert_eq!(first.phonetic, "əˈbændən");
        assert_eq!(first.definition, "v. 放弃；抛弃");

        assert_eq!(
            vocabulary.stats,
            ParseStats {
                total_lines: 11,
                valid_words: 3,
                skipped_lines: 6,
                error_lines: 1,
                duplicates: 1,
            }
        );
    }

    #[test]
    fn test_crlf_lines() {
        let vocabulary = parse_str("apple [ˈæpl] n. 苹果\r\npear [peə] n. 梨\r\n");
        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.items[1].definition, "n. 梨");
    }

    #[test]
    fn test_empty_input() {
        let vocabulary = parse_str("");
        assert!(vocabulary.is_empty());
        assert_eq!(vocabulary.stats.total_lines, 1);
        assert_eq!(vocabulary.stats.skipped_lines, 1);
    }

    #[test]
    fn test_truncate() {
        let mut vocabulary = parse_str("a1 [x] one\na2 [x] two\na3 [x] three\n");
        vocabulary.truncate(2);
        assert_eq!(vocabulary.len(), 2);
        vocabulary.truncate(10);
        assert_eq!(vocabulary.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = parse_file(Path::new("/nonexistent/book.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, PregenError::InputFileRead { .. }));
    }
}
