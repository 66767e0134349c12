//! Incremental parser for marker-annotated generation streams.
//!
//! [`StreamParser`] is a pure state-transition function over
//! `(StreamState, chunk) -> StreamState`. It never re-scans text it has
//! already consumed: markers are extracted by an incremental
//! [`MarkerScanner`] before any text reaches the visible or thinking
//! buffers, `---` delimiters are searched for only around newly appended
//! text, and the open section grows by its new tail.
//!
//! # Invariants
//!
//! - `sections` is append-only; only the last element changes in place,
//!   and only while it is open (`complete == false`).
//! - `sections[i].order == i`.
//! - `full_content` only grows during `consume`.
//! - After [`StreamParser::finalize`], every section is complete and the
//!   live buffer is empty. Finalizing twice changes nothing.
//!
//! # Flush policy
//!
//! `consume` reports `should_flush` when a section completed, when
//! `flush_min_chars` of output are waiting, or when output is waiting and
//! `flush_interval` has passed since the last flush. A quiet provider does
//! not stall that last rule: [`StreamParser::flush_deadline`] tells the
//! driver when pending output falls due, and
//! [`StreamParser::flush_due_at`] flushes it without a new chunk.

pub mod products;
pub mod scanner;
pub mod sections;

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use sluice_types::config::StreamSettings;
use sluice_types::{Section, StreamUpdate};

pub use scanner::{MarkerScanner, Token};

// ── Settings ─────────────────────────────────────────────────────────────

/// Tuning for [`StreamParser`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserSettings {
    pub flush_min_chars: usize,
    pub flush_interval: Duration,
    pub max_marker_len: usize,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self::from(&StreamSettings::default())
    }
}

impl From<&StreamSettings> for ParserSettings {
    fn from(s: &StreamSettings) -> Self {
        Self {
            flush_min_chars: s.flush_min_chars,
            flush_interval: s.flush_interval(),
            max_marker_len: s.max_marker_len,
        }
    }
}

// ── State ────────────────────────────────────────────────────────────────

/// Mutable progress of one stream. Owned by exactly one consumer.
#[derive(Debug, Clone)]
pub struct StreamState {
    full_content: String,
    thinking: String,
    sections: Vec<Section>,
    /// Visible text since the last delimiter.
    buffer: String,
    /// Every chunk as received, markers included.
    raw: String,
    scanner: MarkerScanner,
    thinking_mode: bool,
    chunk_count: u64,
    last_flush: Instant,
    unflushed_chars: usize,
    products: Vec<serde_json::Value>,
    finalized: bool,
}

impl StreamState {
    fn new(max_marker_len: usize, now: Instant) -> Self {
        Self {
            full_content: String::new(),
            thinking: String::new(),
            sections: Vec::new(),
            buffer: String::new(),
            raw: String::new(),
            scanner: MarkerScanner::new(max_marker_len),
            thinking_mode: false,
            chunk_count: 0,
            last_flush: now,
            unflushed_chars: 0,
            products: Vec::new(),
            finalized: false,
        }
    }

    pub fn full_content(&self) -> &str {
        &self.full_content
    }

    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The open section, if the last one is still receiving text.
    pub fn current_section(&self) -> Option<&Section> {
        self.sections.last().filter(|s| !s.complete)
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn chunk_count(&self) -> u64 {
        self.chunk_count
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    pub fn is_thinking(&self) -> bool {
        self.thinking_mode
    }

    /// Products parsed at finalize. Empty before then.
    pub fn products(&self) -> &[serde_json::Value] {
        &self.products
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Whether output arrived since the last flush.
    pub fn has_unflushed(&self) -> bool {
        self.unflushed_chars > 0
    }

    /// Snapshot for the consumer.
    pub fn update(&self) -> StreamUpdate {
        StreamUpdate {
            content: self.full_content.clone(),
            thinking: self.thinking.clone(),
            sections: self.sections.clone(),
            chunk_count: self.chunk_count,
        }
    }

    fn push_thinking(&mut self, text: &str) {
        self.thinking.push_str(text);
        self.unflushed_chars += text.chars().count();
    }

    fn push_visible(&mut self, text: &str, completed: &mut Vec<Section>) {
        self.full_content.push_str(text);
        self.unflushed_chars += text.chars().count();

        // Only a delimiter overlapping the new text can be new.
        let mut from = self.buffer.len().saturating_sub(sections::DELIMITER.len() - 1);
        while !self.buffer.is_char_boundary(from) {
            from -= 1;
        }
        self.buffer.push_str(text);

        while let Some(rel) = self.buffer[from..].find(sections::DELIMITER) {
            let pos = from + rel;
            let head: String = self.buffer.drain(..pos + sections::DELIMITER.len()).collect();
            if let Some(section) = self.commit(&head[..pos]) {
                completed.push(section);
            }
            from = 0;
        }
        self.refresh_open_section();
    }

    /// Freeze the open section with `text`, or append a completed one.
    fn commit(&mut self, text: &str) -> Option<Section> {
        let open = self.sections.last().is_some_and(|s| !s.complete);
        let order = if open {
            self.sections.len() - 1
        } else {
            self.sections.len()
        };

        let section = match sections::build(text, order, true) {
            Some(section) => section,
            None => {
                // Whitespace-only; an already-visible open section is frozen as is.
                let last = self.sections.last_mut().filter(|s| !s.complete)?;
                last.complete = true;
                return Some(last.clone());
            }
        };

        if open {
            self.sections[order] = section.clone();
        } else {
            self.sections.push(section.clone());
        }
        trace!(order, kind = %section.kind, "section completed");
        Some(section)
    }

    fn refresh_open_section(&mut self) {
        // A trailing `-` or `--` may be the start of a delimiter.
        let candidate = self.buffer.trim_end_matches('-');
        let end = candidate.trim_end().len();
        let start = end - candidate[..end].trim_start().len();
        if start == end {
            return;
        }
        let text = &self.buffer[start..end];

        if !self.sections.last().is_some_and(|s| !s.complete) {
            if let Some(section) = sections::build(text, self.sections.len(), false) {
                self.sections.push(section);
            }
            return;
        }
        let Some(open) = self.sections.last_mut() else {
            return;
        };

        // The buffer only grows, so the open section's content is a prefix of `text`.
        let known = open.content.len();
        if known <= text.len() {
            open.content.push_str(&text[known..]);
        } else {
            open.content = text.to_string();
        }
        let first_line_end = open.content.find('\n');
        if first_line_end.is_none_or(|p| p >= known) {
            let first_line = &open.content[..first_line_end.unwrap_or(open.content.len())];
            open.kind = sections::classify(first_line);
            open.title = sections::title(first_line);
        }
    }
}

fn mark_flushed(state: &mut StreamState, now: Instant) {
    trace!(
        chunk = state.chunk_count,
        pending = state.unflushed_chars,
        "flush"
    );
    state.unflushed_chars = 0;
    state.last_flush = now;
}

/// Result of consuming one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumeOutcome {
    /// Whether the consumer should be sent an update now.
    pub should_flush: bool,
    /// Sections frozen by this chunk, in order.
    pub completed_sections: Vec<Section>,
    /// `[STATUS:..]` values seen in this chunk, in order.
    pub statuses: Vec<String>,
}

// ── Parser ───────────────────────────────────────────────────────────────

/// Stateless driver; all progress lives in [`StreamState`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamParser {
    settings: ParserSettings,
}

impl StreamParser {
    pub fn new(settings: ParserSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    /// Fresh state for a new stream.
    pub fn new_state(&self) -> StreamState {
        self.new_state_at(Instant::now())
    }

    pub fn new_state_at(&self, now: Instant) -> StreamState {
        StreamState::new(self.settings.max_marker_len, now)
    }

    /// Consume one chunk.
    pub fn consume(&self, state: &mut StreamState, chunk: &str) -> ConsumeOutcome {
        self.consume_at(state, chunk, Instant::now())
    }

    /// [`consume`](Self::consume) with an explicit clock reading.
    pub fn consume_at(&self, state: &mut StreamState, chunk: &str, now: Instant) -> ConsumeOutcome {
        let mut outcome = ConsumeOutcome::default();
        if state.finalized {
            debug!("chunk after finalize ignored");
            return outcome;
        }

        state.chunk_count += 1;
        state.raw.push_str(chunk);

        let mut tokens = Vec::new();
        state.scanner.feed(chunk, &mut tokens);

        for token in tokens {
            match token {
                Token::Text(text) if state.thinking_mode => state.push_thinking(&text),
                Token::Text(text) => state.push_visible(&text, &mut outcome.completed_sections),
                Token::Thinking(text) => state.push_thinking(&text),
                Token::Status(status) => outcome.statuses.push(status),
                Token::ThinkingStart => state.thinking_mode = true,
                Token::ThinkingEnd => state.thinking_mode = false,
            }
        }

        outcome.should_flush = self.should_flush(state, !outcome.completed_sections.is_empty(), now);
        if outcome.should_flush {
            mark_flushed(state, now);
        }
        outcome
    }

    /// When pending output falls due under the interval rule. `None` when
    /// nothing is waiting.
    pub fn flush_deadline(&self, state: &StreamState) -> Option<Instant> {
        (state.unflushed_chars > 0 && !state.finalized)
            .then(|| state.last_flush + self.settings.flush_interval)
    }

    /// Flush pending output at `now` if it is due, without a new chunk.
    /// Returns whether the consumer should be sent an update.
    pub fn flush_due_at(&self, state: &mut StreamState, now: Instant) -> bool {
        if state.finalized || !self.should_flush(state, false, now) {
            return false;
        }
        mark_flushed(state, now);
        true
    }

    fn should_flush(&self, state: &StreamState, sections_completed: bool, now: Instant) -> bool {
        if sections_completed {
            return true;
        }
        if state.unflushed_chars == 0 {
            return false;
        }
        state.unflushed_chars >= self.settings.flush_min_chars
            || now.saturating_duration_since(state.last_flush) >= self.settings.flush_interval
    }

    /// Close the stream: freeze the open section, tidy remnants and
    /// extract products. Idempotent.
    pub fn finalize(&self, state: &mut StreamState) {
        if state.finalized {
            return;
        }

        if let Some(text) = state.scanner.finish() {
            if state.thinking_mode {
                state.push_thinking(&text);
            } else {
                let mut completed = Vec::new();
                state.push_visible(&text, &mut completed);
            }
        }

        let rest = std::mem::take(&mut state.buffer);
        state.commit(&rest);
        for section in &mut state.sections {
            section.complete = true;
            section.content = sections::strip_orphan_closers(&section.content)
                .trim()
                .to_string();
            section.title = sections::strip_orphan_closers(&section.title);
        }

        state.full_content = sections::strip_orphan_closers(&state.full_content)
            .trim_end()
            .to_string();
        state.products = products::extract_products(&state.raw);
        state.thinking_mode = false;
        state.unflushed_chars = 0;
        state.finalized = true;

        debug!(
            sections = state.sections.len(),
            chunks = state.chunk_count,
            products = state.products.len(),
            "stream finalized"
        );
    }

    /// Rebuild a finalized state from checkpointed visible text.
    pub fn restore(&self, content: &str) -> StreamState {
        let mut state = self.new_state();
        // Checkpointed text is already marker-free, so it bypasses the scanner.
        let mut completed = Vec::new();
        state.push_visible(content, &mut completed);
        self.finalize(&mut state);
        state
    }
}
