//! Engine and wrapping configuration.

use serde::{Deserialize, Serialize};

use crate::token::DEFAULT_PREFIX;

/// Environment variable that overrides the token prefix in [`EngineOptions::from_env`].
pub const PREFIX_ENV_VAR: &str = "DEFERRED_HELPERS_PREFIX";

/// Construction options for a [`crate::HelperEngine`].
///
/// Hosts can embed this struct in their own configuration files:
///
/// ```rust
/// use deferred_engine::EngineOptions;
///
/// let options: EngineOptions = serde_json::from_str(r#"{ "prefix": "{$custom$prefix$$" }"#)?;
/// assert_eq!(options.prefix, "{$custom$prefix$$");
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct EngineOptions {
    /// Leading text of every token issued and recognized by the engine.
    pub prefix: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }
}

impl EngineOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Defaults overlaid with [`PREFIX_ENV_VAR`] when it is set and non-blank.
    pub fn from_env() -> Self {
        match std::env::var(PREFIX_ENV_VAR) {
            Ok(prefix) if !prefix.trim().is_empty() => Self::with_prefix(prefix),
            _ => Self::default(),
        }
    }
}

/// Controls whether [`crate::HelperEngine::wrap_helper`] hands back the raw
/// helper or a proxy that records a deferred invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WrapOptions {
    pub wrap: bool,
}

impl WrapOptions {
    /// Proxy that returns a token instead of running the helper.
    pub fn wrapped() -> Self {
        Self { wrap: true }
    }

    /// The helper exactly as registered.
    pub fn raw() -> Self {
        Self { wrap: false }
    }
}
