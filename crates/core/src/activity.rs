// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Activity/prompt detector (spec §4.10, component C10).
//!
//! Classifies the tail of a session's rendered output as "idle at prompt"
//! or "active", memoising the classification of recently-seen row text so
//! repeated identical prompts (the common case — a shell re-printing the
//! same prompt after every command) cost O(1) amortised.

use std::collections::VecDeque;
use std::sync::{LazyLock, Mutex};
use std::time::{Duration, Instant};

use regex::RegexSet;
use tracing::error;

/// How long since the last output before a session is considered idle
/// regardless of whether the final row looks like a prompt.
const ACTIVE_WINDOW: Duration = Duration::from_secs(2);

/// Bound on the classification memo to keep per-output cost O(1) amortised.
const CACHE_CAPACITY: usize = 1024;

/// Source patterns for [`PROMPT_PATTERNS`], kept as a const array so the set
/// below is built from a known-good literal list rather than anything
/// fallible at runtime.
const PROMPT_PATTERN_SOURCES: &[&str] =
    &[r"\$\s*$", r">\s*$", r"#\s*$", r"%\s*$", r"❯\s*$", r"➜\s*$", r"\]\s*[$#%>]\s*$"];

/// Prompt shapes recognised across common shells, editors, and TUIs.
/// A negative lookahead isn't available in `regex`'s RegexSet, so Python's
/// `>>>`/`...` REPL prompts are excluded by checking the raw line directly
/// in [`looks_like_prompt`] rather than folding them into this set.
///
/// [`PROMPT_PATTERN_SOURCES`] is covered by [`tests::prompt_patterns_compile`],
/// so a compile failure here would mean that test already failed; should it
/// ever happen in a build that skipped tests, fall back to a set that never
/// matches rather than panicking.
static PROMPT_PATTERNS: LazyLock<RegexSet> = LazyLock::new(|| {
    RegexSet::new(PROMPT_PATTERN_SOURCES).unwrap_or_else(|e| {
        error!(error = %e, "prompt pattern set failed to compile, activity detection will treat nothing as a prompt");
        RegexSet::empty()
    })
});

/// Strip a trailing ANSI SGR/CSI sequence run and trailing whitespace,
/// mirroring what a subscriber would see as the visually rendered line.
fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            for next in chars.by_ref() {
                if next.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

fn looks_like_prompt(line: &str) -> bool {
    let stripped = strip_ansi(line);
    let trimmed = stripped.trim_end();
    if trimmed.ends_with(">>>") || trimmed.ends_with("...") {
        return false;
    }
    PROMPT_PATTERNS.is_match(trimmed)
}

/// Per-session activity state: whether output is "fresh" and whether the
/// current final row reads as an idle prompt.
pub struct Detector {
    cache: Mutex<Cache>,
    last_output_at: Mutex<Option<Instant>>,
}

struct Cache {
    order: VecDeque<String>,
    map: std::collections::HashMap<String, bool>,
}

impl Cache {
    fn new() -> Self {
        Self { order: VecDeque::new(), map: std::collections::HashMap::new() }
    }

    fn classify(&mut self, line: &str) -> bool {
        if let Some(&hit) = self.map.get(line) {
            return hit;
        }
        let result = looks_like_prompt(line);
        if self.map.len() >= CACHE_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(line.to_owned());
        self.map.insert(line.to_owned(), result);
        result
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl Detector {
    pub fn new() -> Self {
        Self { cache: Mutex::new(Cache::new()), last_output_at: Mutex::new(None) }
    }

    /// Record that output occurred; call this on every PTY chunk.
    pub fn note_output(&self) {
        *self
            .last_output_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(Instant::now());
    }

    /// Whether the session is currently "active": output within the active
    /// window and the final rendered row doesn't look like an idle prompt.
    pub fn is_active(&self, last_line: &str) -> bool {
        let fresh = self
            .last_output_at
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some_and(|at| at.elapsed() < ACTIVE_WINDOW);
        if !fresh {
            return false;
        }
        let at_prompt = self
            .cache
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .classify(last_line);
        !at_prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_patterns_compile() {
        assert_eq!(PROMPT_PATTERNS.len(), PROMPT_PATTERN_SOURCES.len());
    }

    #[test]
    fn recognises_common_prompt_shapes() {
        for line in ["user@host:~$ ", "C:\\> ", "root# ", "zsh% ", "❯ ", "[venv] $ "] {
            assert!(looks_like_prompt(line), "expected {line:?} to look like a prompt");
        }
    }

    #[test]
    fn excludes_python_repl_continuations() {
        assert!(!looks_like_prompt(">>> "));
        assert!(!looks_like_prompt("... "));
    }

    #[test]
    fn strips_ansi_before_matching() {
        assert!(looks_like_prompt("\x1b[32muser@host\x1b[0m:~$ "));
    }

    #[test]
    fn idle_without_recent_output() {
        let det = Detector::new();
        assert!(!det.is_active("$ "));
    }

    #[test]
    fn active_after_output_when_not_at_prompt() {
        let det = Detector::new();
        det.note_output();
        assert!(det.is_active("compiling module foo..."));
    }

    #[test]
    fn idle_after_output_when_at_prompt() {
        let det = Detector::new();
        det.note_output();
        assert!(!det.is_active("user@host:~$ "));
    }

    #[test]
    fn cache_evicts_oldest_beyond_capacity() {
        let mut cache = Cache::new();
        for i in 0..CACHE_CAPACITY + 10 {
            cache.classify(&format!("line-{i}$"));
        }
        assert_eq!(cache.map.len(), CACHE_CAPACITY);
    }
}
