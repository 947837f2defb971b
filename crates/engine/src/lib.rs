//! # Deferred Helper Engine
//!
//! Lets synchronous rendering code call helpers whose results are not
//! available yet. A wrapped helper returns a placeholder token immediately and
//! records the call; once rendering is done, the output is handed back to the
//! engine, which runs the recorded helpers and replaces every token with its
//! result.
//!
//! ## Key Features
//!
//! - **Token Issuance**: Unique, recognizable placeholder tokens per engine instance
//! - **Helper Registry**: Synchronous and completion-style asynchronous helpers by name
//! - **Deferred Wrapping**: Proxies that record calls instead of running helpers
//! - **Recursive Resolution**: Tokens inside arguments and results are resolved first
//! - **Cycle Detection**: Self-referencing values fail instead of recursing forever
//! - **Cached Outcomes**: Each call runs once; values and errors are both remembered
//!
//! ## Usage
//!
//! ```rust
//! use deferred_engine::{Completion, Helper, HelperEngine, WrapOptions};
//! use deferred_types::Value;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build()?.block_on(async {
//! let engine = HelperEngine::with_defaults();
//! engine.set("user", Helper::asynchronous(|args, completion: Completion| {
//!     let name = args.first().and_then(Value::as_str).unwrap_or_default().to_string();
//!     tokio::spawn(async move { completion.succeed(format!("@{name}")) });
//!     Ok(())
//! }));
//!
//! let user = engine.get("user", WrapOptions::wrapped())?;
//! let rendered = format!("Maintained by {}", user.call(vec!["doowb".into()])?);
//!
//! let resolved = engine.resolve_ids(&Value::from(rendered)).await?;
//! assert_eq!(resolved, Value::from("Maintained by @doowb"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`token`**: Token format, parsing, and extraction
//! - **`helper`**: Helper kinds and the completion contract
//! - **`registry`**: Name-keyed helper storage
//! - **`store`**: Per-instance invocation records with cached outcomes
//! - **`options`**: Engine and wrapping configuration
//! - **`error`**: Construction and resolution errors

mod engine;
pub mod error;
pub mod helper;
pub mod options;
pub mod registry;
mod resolve;
pub mod store;
pub mod token;
mod wrap;

pub use deferred_types::{Array, Object, Value};
pub use engine::HelperEngine;
pub use error::{EngineError, ResolveError};
pub use helper::{Completion, Helper};
pub use options::{EngineOptions, PREFIX_ENV_VAR, WrapOptions};
pub use registry::{HelperDescriptor, HelperRegistry};
pub use store::{InvocationRecord, InvocationStore, Outcome};
pub use token::{DEFAULT_PREFIX, Segment, Token, TokenCodec, format_token};
pub use wrap::{ANONYMOUS_HELPER, HelperSource};
