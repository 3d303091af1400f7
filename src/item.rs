//! Units of work: vocabulary items and the query types run against them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One vocabulary entry. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The headword; unique and case-sensitive.
    pub key: String,
    /// Phonetic transcription or kana reading.
    pub phonetic: String,
    /// Short definition, usually in the learner's language.
    pub definition: String,
}

impl WorkItem {
    /// Create a new work item.
    pub fn new(
        key: impl Into<String>,
        phonetic: impl Into<String>,
        definition: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            phonetic: phonetic.into(),
            definition: definition.into(),
        }
    }
}

/// Kind of content generated for an item.
///
/// Declaration order is processing order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Synonym analysis.
    Synonyms,
    /// Common phrases and collocations.
    Phrases,
}

impl QueryType {
    /// Every query type, in processing order.
    pub const ALL: [QueryType; 2] = [QueryType::Synonyms, QueryType::Phrases];

    /// Stable lowercase name used in files and failed-unit ids.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synonyms => "synonyms",
            Self::Phrases => "phrases",
        }
    }

    /// Position in [`QueryType::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite id of one unit of work, e.g. `"apple:phrases"`.
pub fn unit_id(key: &str, query: QueryType) -> String {
    format!("{key}:{query}")
}

/// Language of the vocabulary list.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English headwords with IPA transcriptions.
    #[default]
    English,
    /// Japanese headwords with kana readings.
    Japanese,
}

impl Language {
    /// Lowercase name stored in the progress file.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::English => "english",
            Self::Japanese => "japanese",
        }
    }

    /// How prompts refer to the pronunciation guide.
    pub fn phonetic_term(self) -> &'static str {
        match self {
            Self::English => "phonetic transcription",
            Self::Japanese => "kana reading",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
