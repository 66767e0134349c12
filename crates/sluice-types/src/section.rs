//! Display sections assembled from a generation stream.
//!
//! A [`Section`] is a titled portion of the assembled output delimited by
//! `---` in the raw stream. Sections are appended in order; only the last
//! one may still be growing.

use serde::{Deserialize, Serialize};

/// The role a section plays in the assembled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionKind {
    Subject,
    Hero,
    Body,
    Cta,
    Notes,
    /// Fallback for kinds written by a newer producer.
    #[serde(other)]
    Unknown,
}

impl SectionKind {
    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Hero => "hero",
            Self::Body => "body",
            Self::Cta => "cta",
            Self::Notes => "notes",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A logical, titled portion of the assembled output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Classified role of the section.
    #[serde(rename = "type")]
    pub kind: SectionKind,

    /// First line of the section with heading and label prefixes removed.
    pub title: String,

    /// Trimmed section text, heading line included.
    pub content: String,

    /// Zero-based position in the section list.
    pub order: usize,

    /// Set once a delimiter follows the section or the stream is finalized.
    pub complete: bool,
}
