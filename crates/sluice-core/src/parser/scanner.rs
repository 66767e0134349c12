//! Incremental scanner for in-band control markers.
//!
//! The scanner turns raw chunks into [`Token`]s. Markers may be split
//! anywhere across chunk boundaries, so a trailing `[` that could still
//! become a marker is held back until enough text arrives to decide.
//!
//! | Marker                  | Token                                        |
//! |-------------------------|----------------------------------------------|
//! | `[STATUS:<word>]`       | [`Token::Status`]                            |
//! | `[THINKING:START]`      | [`Token::ThinkingStart`]                     |
//! | `[THINKING:END]`        | [`Token::ThinkingEnd`]                       |
//! | `[THINKING:CHUNK]<txt>` | [`Token::Thinking`] up to next `[` or chunk end |
//! | `[PRODUCTS:<json>]`     | none (extracted from the raw stream at finalize) |
//! | `[REMEMBER:<text>]`     | none                                         |

use tracing::debug;

/// Kinds of recognised markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerKind {
    Status,
    Thinking,
    Products,
    Remember,
}

impl MarkerKind {
    pub(crate) fn opener(self) -> &'static str {
        match self {
            Self::Status => "[STATUS:",
            Self::Thinking => "[THINKING:",
            Self::Products => "[PRODUCTS:",
            Self::Remember => "[REMEMBER:",
        }
    }
}

const KINDS: [MarkerKind; 4] = [
    MarkerKind::Status,
    MarkerKind::Thinking,
    MarkerKind::Products,
    MarkerKind::Remember,
];

/// Output of the scanner, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Ordinary text; routed by the current thinking mode.
    Text(String),
    /// Text that belongs to the thinking buffer regardless of mode.
    Thinking(String),
    Status(String),
    ThinkingStart,
    ThinkingEnd,
}

enum Prefix {
    /// Starts with a full opener.
    Marker(MarkerKind),
    /// Shorter than every opener it could still become.
    Partial,
    /// Cannot be a marker.
    None,
}

fn classify(rest: &str) -> Prefix {
    for kind in KINDS {
        if rest.starts_with(kind.opener()) {
            return Prefix::Marker(kind);
        }
    }
    if KINDS.iter().any(|k| k.opener().starts_with(rest)) {
        return Prefix::Partial;
    }
    Prefix::None
}

/// Byte offset of the `]` closing the marker that starts `rest`.
///
/// `PRODUCTS` payloads are JSON and may contain brackets, so that marker
/// is closed by bracket depth, ignoring brackets inside string literals.
pub(crate) fn find_close(kind: MarkerKind, rest: &str) -> Option<usize> {
    let start = kind.opener().len();
    if kind != MarkerKind::Products {
        return rest[start..].find(']').map(|p| p + start);
    }

    let mut depth = 1usize;
    let mut in_string = false;
    let mut escape = false;
    for (offset, b) in rest.as_bytes()[start..].iter().enumerate() {
        if in_string {
            if escape {
                escape = false;
            } else if *b == b'\\' {
                escape = true;
            } else if *b == b'"' {
                in_string = false;
            }
            continue;
        }
        match *b {
            b'"' => in_string = true,
            b'[' => depth += 1,
            b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Stateful marker scanner for one stream.
#[derive(Debug, Clone)]
pub struct MarkerScanner {
    pending: String,
    max_marker_len: usize,
}

impl MarkerScanner {
    pub fn new(max_marker_len: usize) -> Self {
        Self {
            pending: String::new(),
            max_marker_len,
        }
    }

    /// Text held back as a possible marker.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Scan one chunk, appending tokens to `out`.
    pub fn feed(&mut self, chunk: &str, out: &mut Vec<Token>) {
        let mut buf = std::mem::take(&mut self.pending);
        buf.push_str(chunk);

        // Set by [THINKING:CHUNK]; ends at the next `[` or the end of this chunk.
        let mut capture = false;
        let mut text_start = 0;
        let mut i = 0;

        while let Some(rel) = buf[i..].find('[') {
            let open = i + rel;
            let rest = &buf[open..];
            match classify(rest) {
                Prefix::None => {
                    if capture {
                        emit(out, &buf[text_start..open], true);
                        text_start = open;
                        capture = false;
                    }
                    i = open + 1;
                }
                Prefix::Partial => {
                    emit(out, &buf[text_start..open], capture);
                    self.pending = rest.to_string();
                    return;
                }
                Prefix::Marker(kind) => match find_close(kind, rest) {
                    Some(close) => {
                        emit(out, &buf[text_start..open], capture);
                        capture = false;
                        let body = &rest[kind.opener().len()..close];
                        match kind {
                            MarkerKind::Status => {
                                let status = body.trim();
                                if !status.is_empty() {
                                    out.push(Token::Status(status.to_string()));
                                }
                            }
                            MarkerKind::Thinking => match body.trim() {
                                "START" => out.push(Token::ThinkingStart),
                                "END" => out.push(Token::ThinkingEnd),
                                "CHUNK" => capture = true,
                                other => debug!(marker = %other, "ignoring unknown thinking marker"),
                            },
                            MarkerKind::Products | MarkerKind::Remember => {}
                        }
                        i = open + close + 1;
                        text_start = i;
                    }
                    None if rest.len() > self.max_marker_len => {
                        debug!(len = rest.len(), "unterminated marker exceeds limit, treating as text");
                        i = open + 1;
                    }
                    None => {
                        emit(out, &buf[text_start..open], capture);
                        self.pending = rest.to_string();
                        return;
                    }
                },
            }
        }

        emit(out, &buf[text_start..], capture);
    }

    /// End of stream. Returns held-back text that never became a full
    /// opener (a bare `[` or `[PRO`), which is ordinary text. An
    /// unterminated marker is discarded.
    pub fn finish(&mut self) -> Option<String> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return None;
        }
        match classify(&pending) {
            Prefix::Marker(kind) => {
                debug!(
                    marker = kind.opener(),
                    len = pending.len(),
                    "dropping unterminated marker at end of stream"
                );
                None
            }
            Prefix::Partial | Prefix::None => Some(pending),
        }
    }
}

fn emit(out: &mut Vec<Token>, text: &str, thinking: bool) {
    if text.is_empty() {
        return;
    }
    if thinking {
        out.push(Token::Thinking(text.to_string()));
    } else {
        out.push(Token::Text(text.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(chunks: &[&str]) -> (Vec<Token>, MarkerScanner) {
        let mut scanner = MarkerScanner::new(1024);
        let mut out = Vec::new();
        for chunk in chunks {
            scanner.feed(chunk, &mut out);
        }
        (out, scanner)
    }

    fn text_of(tokens: &[Token]) -> String {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Text(s) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_passes_through() {
        let (tokens, _) = scan(&["hello ", "world"]);
        assert_eq!(text_of(&tokens), "hello world");
    }

    #[test]
    fn status_marker_in_one_chunk() {
        let (tokens, _) = scan(&["a[STATUS:writing]b"]);
        assert_eq!(
            tokens,
            vec![
                Token::Text("a".into()),
                Token::Status("writing".into()),
                Token::Text("b".into()),
            ]
        );
    }

    #[test]
    fn marker_split_across_every_boundary() {
        let input = "x[STATUS:done]y";
        for split in 1..input.len() {
            let (tokens, scanner) = scan(&[&input[..split], &input[split..]]);
            assert_eq!(text_of(&tokens), "xy", "split at {split}");
            assert!(tokens.contains(&Token::Status("done".into())), "split at {split}");
            assert!(scanner.pending().is_empty());
        }
    }

    #[test]
    fn literal_brackets_survive() {
        let (tokens, _) = scan(&["see [1] and [note] here"]);
        assert_eq!(text_of(&tokens), "see [1] and [note] here");
    }

    #[test]
    fn bracket_at_chunk_end_is_held_then_released() {
        let mut scanner = MarkerScanner::new(1024);
        let mut out = Vec::new();
        scanner.feed("price [", &mut out);
        assert_eq!(scanner.pending(), "[");
        scanner.feed("USD]", &mut out);
        assert_eq!(text_of(&out), "price [USD]");
    }

    #[test]
    fn thinking_toggles() {
        let (tokens, _) = scan(&["[THINKING:START]why[THINKING:END]what"]);
        assert_eq!(
            tokens,
            vec![
                Token::ThinkingStart,
                Token::Text("why".into()),
                Token::ThinkingEnd,
                Token::Text("what".into()),
            ]
        );
    }

    #[test]
    fn thinking_chunk_captures_until_bracket() {
        let (tokens, _) = scan(&["[THINKING:CHUNK]plan a[STATUS:x]visible"]);
        assert_eq!(
            tokens,
            vec![
                Token::Thinking("plan a".into()),
                Token::Status("x".into()),
                Token::Text("visible".into()),
            ]
        );
    }

    #[test]
    fn thinking_chunk_ends_at_chunk_end() {
        let (tokens, _) = scan(&["[THINKING:CHUNK]idea", " visible"]);
        assert_eq!(
            tokens,
            vec![Token::Thinking("idea".into()), Token::Text(" visible".into())]
        );
    }

    #[test]
    fn thinking_chunk_ends_at_literal_bracket() {
        let (tokens, _) = scan(&["[THINKING:CHUNK]idea[1] after"]);
        assert_eq!(
            tokens,
            vec![Token::Thinking("idea".into()), Token::Text("[1] after".into())]
        );
    }

    #[test]
    fn remember_and_products_are_stripped() {
        let (tokens, _) = scan(&[
            "a[REMEMBER:user likes blue]b",
            "[PRODUCTS:[{\"name\":\"x]\",\"tags\":[\"a\"]}]]c",
        ]);
        assert_eq!(text_of(&tokens), "abc");
    }

    #[test]
    fn products_split_across_chunks() {
        let (tokens, scanner) = scan(&["pre[PRODUCTS:[{\"id\":", "1},{\"id\":2}]", "]post"]);
        assert_eq!(text_of(&tokens), "prepost");
        assert!(scanner.pending().is_empty());
    }

    #[test]
    fn find_close_handles_nesting_and_strings() {
        let rest = r#"[PRODUCTS:[{"n":"a\"]b"},[1,[2]]]]tail"#;
        let close = find_close(MarkerKind::Products, rest).unwrap();
        assert_eq!(&rest[close + 1..], "tail");
    }

    #[test]
    fn overlong_unterminated_marker_becomes_text() {
        let mut scanner = MarkerScanner::new(16);
        let mut out = Vec::new();
        scanner.feed("[REMEMBER:this never closes and is long", &mut out);
        assert!(scanner.pending().is_empty());
        assert_eq!(text_of(&out), "[REMEMBER:this never closes and is long");
    }

    #[test]
    fn finish_discards_unterminated_marker() {
        let mut scanner = MarkerScanner::new(1024);
        let mut out = Vec::new();
        scanner.feed("end[STATUS:wri", &mut out);
        assert_eq!(text_of(&out), "end");
        assert!(scanner.finish().is_none());
        assert!(scanner.pending().is_empty());
    }

    #[test]
    fn finish_releases_partial_opener_as_text() {
        for tail in ["[", "[P", "[THINK"] {
            let mut scanner = MarkerScanner::new(1024);
            let mut out = Vec::new();
            scanner.feed(&format!("price {tail}"), &mut out);
            assert_eq!(text_of(&out), "price ");
            assert_eq!(scanner.finish().as_deref(), Some(tail));
            assert!(scanner.finish().is_none());
        }
    }

    #[test]
    fn unknown_thinking_body_is_stripped() {
        let (tokens, _) = scan(&["a[THINKING:PAUSE]b"]);
        assert_eq!(tokens, vec![Token::Text("a".into()), Token::Text("b".into())]);
    }
}
