//! Environment and URL-parsing capabilities.
//!
//! Nothing in the gate reads process state directly: components receive an
//! [`EnvAccessor`] and a [`UrlParser`] so tests can run concurrently against
//! isolated fake environments.

use reqwest::Url;

/// Read-only view of environment variables.
pub trait EnvAccessor: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;

    /// True when `key` is set to something other than whitespace.
    fn has_non_blank(&self, key: &str) -> bool {
        self.var(key).is_some_and(|value| !value.trim().is_empty())
    }
}

/// Production accessor over the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvAccessor for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Why a URL value was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{cause}")]
pub struct UrlParseFailure {
    pub cause: String,
}

/// Parses and canonicalizes URL strings.
pub trait UrlParser: Send + Sync {
    /// Returns the canonical serialization of `value`.
    fn parse(&self, value: &str) -> Result<String, UrlParseFailure>;
}

/// WHATWG URL parsing via the `url` types re-exported by reqwest.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultUrlParser;

impl UrlParser for DefaultUrlParser {
    fn parse(&self, value: &str) -> Result<String, UrlParseFailure> {
        Url::parse(value)
            .map(|url| url.to_string())
            .map_err(|e| UrlParseFailure {
                cause: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MapEnv;

    #[test]
    fn test_default_parser_canonicalizes() {
        let parsed = DefaultUrlParser.parse("HTTP://127.0.0.1:4099").unwrap();
        assert_eq!(parsed, "http://127.0.0.1:4099/");
    }

    #[test]
    fn test_default_parser_rejects_relative() {
        let err = DefaultUrlParser.parse("not a url").unwrap_err();
        assert!(!err.cause.is_empty());
    }

    #[test]
    fn test_has_non_blank() {
        let env = MapEnv::new()
            .with("SET", "value")
            .with("BLANK", "   ");
        assert!(env.has_non_blank("SET"));
        assert!(!env.has_non_blank("BLANK"));
        assert!(!env.has_non_blank("MISSING"));
    }
}
