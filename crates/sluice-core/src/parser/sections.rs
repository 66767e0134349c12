//! Section classification and titling.
//!
//! A section's kind and title come from its first non-empty line. Labels
//! are matched case-insensitively after markdown decoration (`#`, `*`,
//! `>`, `_`) is stripped, so `## Hero`, `**HERO SECTION:**` and
//! `hero:` all classify as [`SectionKind::Hero`].

use sluice_types::{Section, SectionKind};

/// Literal section delimiter.
pub const DELIMITER: &str = "---";

const LABELS: &[(&str, SectionKind)] = &[
    ("subject", SectionKind::Subject),
    ("hero", SectionKind::Hero),
    ("call to action", SectionKind::Cta),
    ("call-to-action", SectionKind::Cta),
    ("cta", SectionKind::Cta),
    ("note", SectionKind::Notes),
    ("body", SectionKind::Body),
];

fn is_decoration(c: char) -> bool {
    matches!(c, '#' | '*' | '>' | '_') || c.is_whitespace()
}

fn strip_decoration(line: &str) -> &str {
    line.trim_matches(is_decoration)
}

fn known_label(label: &str) -> Option<SectionKind> {
    let lower = label.to_lowercase();
    LABELS
        .iter()
        .find(|(keyword, _)| lower.strip_prefix(*keyword).is_some_and(ends_label))
        .map(|(_, kind)| *kind)
}

/// Whether `rest`, the text after a label keyword, closes the label: end of
/// line, a `:`, or a separate `section` word. A plural `s` is allowed.
fn ends_label(rest: &str) -> bool {
    let rest = rest.strip_prefix('s').unwrap_or(rest);
    let trimmed = rest.trim_start_matches(is_decoration);
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return true;
    }
    if trimmed.len() == rest.len() {
        return false;
    }
    trimmed.strip_prefix("section").is_some_and(|tail| {
        let tail = tail.trim_start_matches(is_decoration);
        tail.is_empty() || tail.starts_with(':')
    })
}

/// Kind for a section whose first line is `first_line`. Unlabelled text is body.
pub fn classify(first_line: &str) -> SectionKind {
    known_label(strip_decoration(first_line)).unwrap_or(SectionKind::Body)
}

/// Title for a section whose first line is `first_line`.
///
/// `Subject: Spring sale` yields `Spring sale`; `HERO SECTION:` yields
/// `HERO SECTION`; unlabelled lines are used whole.
pub fn title(first_line: &str) -> String {
    let line = strip_decoration(first_line);
    if let Some((label, rest)) = line.split_once(':') {
        let label = label.trim_matches(is_decoration);
        if known_label(label).is_some() {
            let rest = rest.trim_matches(is_decoration);
            let chosen = if rest.is_empty() { label } else { rest };
            return chosen.to_string();
        }
        if rest.trim().is_empty() {
            return label.to_string();
        }
    }
    line.to_string()
}

/// Build a section from raw text. Returns `None` for whitespace-only text.
pub fn build(text: &str, order: usize, complete: bool) -> Option<Section> {
    let content = text.trim();
    let first_line = content.lines().find(|l| !l.trim().is_empty())?;
    Some(Section {
        kind: classify(first_line),
        title: title(first_line),
        content: content.to_string(),
        order,
        complete,
    })
}

/// Remove `]` characters that close nothing on their line.
pub fn strip_orphan_closers(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut depth = 0usize;
        for c in line.chars() {
            match c {
                '[' => {
                    depth += 1;
                    out.push(c);
                }
                ']' if depth == 0 => {}
                ']' => {
                    depth -= 1;
                    out.push(c);
                }
                _ => out.push(c),
            }
        }
    }
    out
}
