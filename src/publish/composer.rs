// src/publish/composer.rs
//! House-style policy applied to the insight draft before it goes out.
//! Pure and deterministic; no failure modes.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::config::ComposeConfig;

const ELLIPSIS: &str = "...";

fn multi_space() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s{2,}").unwrap())
}

fn trailing_partial_word() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"\s+\S*$").unwrap())
}

#[derive(Debug, Clone)]
pub struct Composer {
    terms: Vec<String>,
    symbols: Vec<String>,
    max_len: usize,
}

impl Composer {
    pub fn new(cfg: &ComposeConfig) -> Self {
        Self {
            terms: cfg
                .banned_terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            symbols: cfg
                .banned_symbols
                .iter()
                .filter(|s| !s.is_empty())
                .cloned()
                .collect(),
            max_len: cfg.max_len.max(ELLIPSIS.len() + 1),
        }
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Lowercase, strip banned terms and symbols, enforce the length limit.
    /// Length is counted in chars.
    pub fn compose(&self, draft: &str) -> String {
        let mut text = draft.to_lowercase();

        // One removal can join neighbours into a new banned term, so repeat
        // until nothing changes. Whitespace is only tidied after a removal;
        // a clean draft keeps its line breaks.
        loop {
            let mut next = text.clone();
            for term in &self.terms {
                next = next.replace(term.as_str(), "");
            }
            for sym in &self.symbols {
                next = next.replace(sym.as_str(), "");
            }
            if next == text {
                break;
            }
            text = multi_space().replace_all(&next, " ").trim().to_string();
        }

        self.truncate(text)
    }

    fn truncate(&self, text: String) -> String {
        if text.chars().count() <= self.max_len {
            return text;
        }
        let head: String = text.chars().take(self.max_len - ELLIPSIS.len()).collect();
        let head = trailing_partial_word().replace(&head, "");
        format!("{}{ELLIPSIS}", head.trim_end())
    }
}
