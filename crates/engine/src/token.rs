//! # Placeholder Tokens
//!
//! Formatting and recognition of the tokens a wrapped helper returns in place
//! of its result. A token has the shape
//! `<prefix><instance index>$<invocation index>$}`, for example
//! `{$ASYNCID$0$3$}`, and may appear on its own or embedded in larger text.

use std::{borrow::Borrow, fmt};

use deferred_types::Value;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::EngineError;

/// Prefix used when no custom prefix is configured.
pub const DEFAULT_PREFIX: &str = "{$ASYNCID$";

const TERMINATOR: &str = "$}";

/// An issued placeholder token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Token {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.0
    }
}

impl From<Token> for Value {
    fn from(token: Token) -> Self {
        Value::String(token.0)
    }
}

/// Builds the token for one invocation of one engine instance.
pub fn format_token(prefix: &str, instance_index: u64, invocation_index: u64) -> Token {
    Token(format!("{prefix}{instance_index}${invocation_index}$}}"))
}

/// A piece of text split around token occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'t> {
    Literal(&'t str),
    Token(&'t str),
}

/// Formats and recognizes tokens for a single prefix.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    prefix: String,
    pattern: Regex,
}

impl TokenCodec {
    /// Builds a codec, rejecting prefixes that cannot delimit tokens unambiguously.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPrefix`] when the prefix is empty or
    /// blank, or contains the `$}` token terminator.
    pub fn new(prefix: impl Into<String>) -> Result<Self, EngineError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(EngineError::invalid_prefix(prefix, "prefix must not be empty"));
        }
        if prefix.trim().is_empty() {
            return Err(EngineError::invalid_prefix(prefix, "prefix must contain non-whitespace characters"));
        }
        if prefix.contains(TERMINATOR) {
            return Err(EngineError::invalid_prefix(prefix, "prefix must not contain the `$}` terminator"));
        }

        let pattern = Regex::new(&format!(r"{}(\d+)\$(\d+)\$\}}", regex::escape(&prefix)))
            .map_err(|error| EngineError::invalid_prefix(prefix.as_str(), error.to_string()))?;
        Ok(Self { prefix, pattern })
    }

    /// Codec for [`DEFAULT_PREFIX`].
    pub fn standard() -> Self {
        static STANDARD: Lazy<TokenCodec> = Lazy::new(|| TokenCodec::new(DEFAULT_PREFIX).expect("default token prefix is valid"));

        STANDARD.clone()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn format(&self, instance_index: u64, invocation_index: u64) -> Token {
        format_token(&self.prefix, instance_index, invocation_index)
    }

    /// Returns true when `text` contains at least one token with this prefix.
    pub fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// Every token occurrence in `text`, left to right, duplicates included.
    ///
    /// The iterator is lazy; call again to restart the scan.
    pub fn extract_all<'a>(&'a self, text: &'a str) -> impl Iterator<Item = Token> + 'a {
        self.pattern.find_iter(text).map(|found| Token(found.as_str().to_string()))
    }

    /// Decodes `(instance index, invocation index)` when `text` is exactly one token.
    pub fn parse(&self, text: &str) -> Option<(u64, u64)> {
        let captures = self.pattern.captures(text)?;
        let whole = captures.get(0)?;
        if whole.start() != 0 || whole.end() != text.len() {
            return None;
        }
        let instance_index = captures.get(1)?.as_str().parse().ok()?;
        let invocation_index = captures.get(2)?.as_str().parse().ok()?;
        Some((instance_index, invocation_index))
    }

    /// Splits `text` into literal runs and token occurrences, in order.
    ///
    /// Empty literal runs are omitted, so a lone token yields a single segment.
    pub fn segments<'t>(&self, text: &'t str) -> Vec<Segment<'t>> {
        let mut segments = Vec::new();
        let mut cursor = 0;
        for found in self.pattern.find_iter(text) {
            if found.start() > cursor {
                segments.push(Segment::Literal(&text[cursor..found.start()]));
            }
            segments.push(Segment::Token(found.as_str()));
            cursor = found.end();
        }
        if cursor < text.len() {
            segments.push(Segment::Literal(&text[cursor..]));
        }
        segments
    }
}
