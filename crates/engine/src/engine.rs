//! # Helper Engine
//!
//! The engine instance ties together the token codec, the helper registry, and
//! the invocation store. Handles are cheap to clone and every clone shares the
//! same instance state.
//!
//! Each instance takes its index from a process-wide counter at construction,
//! so tokens issued by different instances never collide. Within an instance,
//! invocation indices follow call order.

use std::{
    fmt,
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use deferred_types::Value;
use tracing::debug;

use crate::{
    error::EngineError,
    helper::Helper,
    options::EngineOptions,
    registry::{HelperDescriptor, HelperRegistry},
    store::{InvocationRecord, InvocationStore, ResolverId},
    token::{Token, TokenCodec},
};

/// Source of instance indices; never reset for the lifetime of the process.
static NEXT_INSTANCE_INDEX: AtomicU64 = AtomicU64::new(0);

/// Registers helpers, issues placeholder tokens for deferred calls, and
/// resolves those tokens back into values.
///
/// ```rust
/// use deferred_engine::{Helper, HelperEngine, WrapOptions};
/// use deferred_types::Value;
///
/// # tokio::runtime::Builder::new_current_thread().build()?.block_on(async {
/// let engine = HelperEngine::with_defaults();
/// engine.set("upper", Helper::sync(|args| {
///     Ok(Value::from(args[0].as_str().unwrap_or_default().to_uppercase()))
/// }));
///
/// let upper = engine.get("upper", WrapOptions::wrapped())?;
/// let token = upper.call(vec!["doowb".into()])?;
/// let greeting = Value::from(format!("Hello {token}!"));
///
/// assert!(engine.has_async_id(&greeting));
/// assert_eq!(engine.resolve_ids(&greeting).await?, Value::from("Hello DOOWB!"));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # })?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct HelperEngine {
    pub(crate) state: Arc<EngineState>,
}

pub(crate) struct EngineState {
    pub(crate) instance_index: u64,
    next_invocation: AtomicU64,
    next_resolver: AtomicU64,
    pub(crate) codec: TokenCodec,
    registry: RwLock<HelperRegistry>,
    pub(crate) store: InvocationStore,
}

impl EngineState {
    /// Records a deferred call of `helper` and returns the token standing in for its result.
    pub(crate) fn issue(&self, helper_name: &str, helper: &Helper, args: Vec<Value>) -> Token {
        let invocation_index = self.next_invocation.fetch_add(1, Ordering::SeqCst);
        let token = self.codec.format(self.instance_index, invocation_index);
        debug!(
            token = %token,
            helper = helper_name,
            argument_count = args.len(),
            "deferred helper call recorded"
        );
        self.store
            .insert(InvocationRecord::new(token.clone(), helper_name, helper.clone(), args));
        token
    }

    /// Identity for a new top-level resolution call.
    pub(crate) fn next_resolver(&self) -> ResolverId {
        self.next_resolver.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn registry(&self) -> RwLockReadGuard<'_, HelperRegistry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, HelperRegistry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HelperEngine {
    /// Creates an engine with the given options.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidPrefix`] when the configured prefix cannot
    /// delimit tokens.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        let codec = TokenCodec::new(options.prefix)?;
        Ok(Self::with_codec(codec))
    }

    /// Creates an engine using the default token prefix.
    pub fn with_defaults() -> Self {
        Self::with_codec(TokenCodec::standard())
    }

    fn with_codec(codec: TokenCodec) -> Self {
        let instance_index = NEXT_INSTANCE_INDEX.fetch_add(1, Ordering::SeqCst);
        debug!(instance_index, prefix = codec.prefix(), "helper engine created");
        Self {
            state: Arc::new(EngineState {
                instance_index,
                next_invocation: AtomicU64::new(0),
                next_resolver: AtomicU64::new(0),
                codec,
                registry: RwLock::new(HelperRegistry::new()),
                store: InvocationStore::new(),
            }),
        }
    }

    pub fn instance_index(&self) -> u64 {
        self.state.instance_index
    }

    pub fn prefix(&self) -> &str {
        self.state.codec.prefix()
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.state.codec
    }

    /// Registers `helper` under `name`, replacing any helper already registered there.
    pub fn set(&self, name: impl Into<String>, helper: Helper) -> Option<HelperDescriptor> {
        let name = name.into();
        debug!(helper = %name, is_async = helper.is_async(), "helper registered");
        self.state.registry_mut().set(name, helper)
    }

    /// The raw helper registered under `name`, unwrapped.
    pub fn helper(&self, name: &str) -> Option<Helper> {
        self.state.registry().get(name).cloned()
    }

    pub fn descriptor(&self, name: &str) -> Option<HelperDescriptor> {
        self.state.registry().descriptor(name).cloned()
    }

    pub fn helper_names(&self) -> Vec<String> {
        self.state.registry().names()
    }

    /// Returns true when `text` contains a token with this engine's prefix.
    pub fn matches(&self, text: &str) -> bool {
        self.state.codec.matches(text)
    }

    /// The invocation record behind `token`, if this engine issued it.
    pub fn record(&self, token: &str) -> Option<Arc<InvocationRecord>> {
        self.state.store.get(token)
    }

    /// Number of recorded invocations, resolved or not.
    pub fn invocation_count(&self) -> usize {
        self.state.store.len()
    }

    /// Number of recorded invocations still waiting to be resolved.
    pub fn pending_count(&self) -> usize {
        self.state.store.pending()
    }

    /// Discards every registered helper and invocation record of this instance.
    ///
    /// The instance index and the invocation counter keep counting, so tokens
    /// issued before the reset resolve to an unknown-token error instead of
    /// aliasing new invocations.
    pub fn reset(&self) {
        let discarded = self.state.store.len();
        self.state.registry_mut().clear();
        self.state.store.clear();
        debug!(
            instance_index = self.state.instance_index,
            discarded_records = discarded,
            "helper engine reset"
        );
    }
}

impl fmt::Debug for HelperEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HelperEngine")
            .field("instance_index", &self.state.instance_index)
            .field("prefix", &self.state.codec.prefix())
            .field("helpers", &self.state.registry().len())
            .field("invocations", &self.state.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::WrapOptions;

    fn upper() -> Helper {
        Helper::sync(|args| {
            let text = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::from(text.to_uppercase()))
        })
    }

    #[test]
    fn instance_indices_strictly_increase() {
        let first = HelperEngine::with_defaults();
        let second = HelperEngine::with_defaults();
        let third = HelperEngine::new(EngineOptions::with_prefix("{$custom$")).expect("engine");
        assert!(first.instance_index() < second.instance_index());
        assert!(second.instance_index() < third.instance_index());
        assert_eq!(third.prefix(), "{$custom$");
    }

    #[test]
    fn clones_share_instance_state() {
        let engine = HelperEngine::with_defaults();
        let clone = engine.clone();
        clone.set("upper", upper());
        assert_eq!(engine.instance_index(), clone.instance_index());
        assert_eq!(engine.helper_names(), vec!["upper"]);
    }

    #[test]
    fn invalid_prefix_fails_construction() {
        let error = HelperEngine::new(EngineOptions::with_prefix("")).expect_err("empty prefix");
        assert!(matches!(error, EngineError::InvalidPrefix { .. }));
    }

    #[test]
    fn set_stores_the_raw_helper_and_its_kind() {
        let engine = HelperEngine::with_defaults();
        let helper = upper();
        engine.set("upper", helper.clone());
        engine.set(
            "fetch",
            Helper::asynchronous(|_, completion| {
                completion.succeed(Value::Null);
                Ok(())
            }),
        );

        assert!(engine.helper("upper").expect("upper").ptr_eq(&helper));
        assert!(!engine.descriptor("upper").expect("upper").is_async());
        assert!(engine.descriptor("fetch").expect("fetch").is_async());
        assert!(engine.helper("missing").is_none());
    }

    #[test]
    fn reset_clears_helpers_and_records_but_keeps_counting() {
        let engine = HelperEngine::with_defaults();
        engine.set("upper", upper());
        let wrapped = engine.get("upper", WrapOptions::wrapped()).expect("wrapped");
        let before = wrapped.call(vec!["a".into()]).expect("token");
        assert_eq!(engine.invocation_count(), 1);
        assert_eq!(engine.pending_count(), 1);

        engine.reset();
        assert!(engine.helper_names().is_empty());
        assert_eq!(engine.invocation_count(), 0);
        assert!(engine.record(before.as_str().expect("token text")).is_none());

        let after = wrapped.call(vec!["b".into()]).expect("token");
        let expected = format!("{{$ASYNCID${}$1$}}", engine.instance_index());
        assert_eq!(after.as_str(), Some(expected.as_str()));
    }

    #[test]
    fn debug_output_summarizes_state() {
        let engine = HelperEngine::with_defaults();
        engine.set("upper", upper());
        let rendered = format!("{engine:?}");
        assert!(rendered.contains("helpers: 1"));
        assert!(rendered.contains("invocations: 0"));
    }
}
