//! # Token Resolution
//!
//! Replaces placeholder tokens with the results of the helper calls they stand
//! for. Resolution walks strings, arrays, and objects recursively:
//!
//! - a string that is exactly one token becomes that token's value, whatever
//!   its type;
//! - a string mixing tokens and text gets each token replaced by the printable
//!   form of its value;
//! - arrays and objects are rebuilt with every element resolved.
//!
//! Resolving a token first resolves the recorded arguments, then runs the
//! helper, then resolves any tokens inside the helper's result. Every record is
//! resolved at most once and later requests return the cached outcome, error
//! included.
//!
//! The walk tracks the tokens and containers currently being resolved. Meeting
//! one of them again means the value refers to itself and resolution fails with
//! [`ResolveError::CircularReference`] instead of recursing forever. A call
//! that would wait on a record held by another call, which in turn waits on
//! this one, fails the same way.
//!
//! A helper that panics fails its invocation with
//! [`ResolveError::HelperExecution`]; builds with `panic = "abort"` abort instead.

use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use anyhow::anyhow;
use deferred_types::{Object, Value};
use deferred_util::drive_detached;
use futures_util::{FutureExt, future::BoxFuture};
use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::{
    engine::HelperEngine,
    error::{EngineError, ResolveError},
    store::{Claim, InvocationRecord, Outcome, ResolverId},
    token::{Segment, TokenCodec},
};

/// Tokens and containers on the current resolution path.
#[derive(Debug)]
struct ResolutionPath {
    resolver: ResolverId,
    containers: Vec<usize>,
    /// `(token, helper name)` for every invocation being resolved, innermost last.
    invocations: Vec<(String, String)>,
}

impl ResolutionPath {
    fn new(resolver: ResolverId) -> Self {
        Self {
            resolver,
            containers: Vec::new(),
            invocations: Vec::new(),
        }
    }

    /// Helper whose invocation is being resolved innermost, if any.
    fn helper(&self) -> Option<&str> {
        self.invocations.last().map(|(_, helper)| helper.as_str())
    }

    fn is_resolving(&self, token: &str) -> bool {
        self.invocations.iter().any(|(active, _)| active == token)
    }

    fn enter_container(&mut self, identity: usize) -> Result<(), ResolveError> {
        if self.containers.contains(&identity) {
            return Err(ResolveError::circular_reference(self.helper()));
        }
        self.containers.push(identity);
        Ok(())
    }

    fn leave_container(&mut self) {
        self.containers.pop();
    }

    fn enter_invocation(&mut self, record: &InvocationRecord) {
        self.invocations
            .push((record.token().to_string(), record.helper_name().to_string()));
    }

    fn leave_invocation(&mut self) {
        self.invocations.pop();
    }
}

impl HelperEngine {
    /// Resolves a single token to its helper's result.
    ///
    /// # Errors
    ///
    /// - [`ResolveError::UnknownToken`] when this engine never issued `token`
    ///   (or discarded it in [`HelperEngine::reset`]).
    /// - [`ResolveError::HelperExecution`] when the helper, or a helper it
    ///   depends on, failed.
    /// - [`ResolveError::CircularReference`] when the arguments refer back to
    ///   the value being resolved.
    pub async fn resolve_id(&self, token: &str) -> Result<Value, ResolveError> {
        self.resolve_token(token, &mut self.begin_resolution()).await
    }

    /// Resolves every token inside `value`.
    ///
    /// Values without tokens come back equal to the input.
    pub async fn resolve_ids(&self, value: &Value) -> Result<Value, ResolveError> {
        self.resolve_value(value, &mut self.begin_resolution()).await
    }

    /// Resolves every element of an argument list, preserving order.
    pub async fn resolve_args(&self, args: &[Value]) -> Result<Vec<Value>, ResolveError> {
        self.resolve_sequence(args, &mut self.begin_resolution()).await
    }

    /// Resolves every value of `object` into a new object with the same keys.
    pub async fn resolve_object(&self, object: &Object) -> Result<Object, ResolveError> {
        self.resolve_mapping(object, &mut self.begin_resolution()).await
    }

    /// Callback form of [`HelperEngine::resolve_id`].
    ///
    /// Inside a Tokio runtime the resolution is spawned and `callback` runs
    /// later on a runtime worker; outside one it runs to completion before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Runtime`] when no runtime could drive the resolution.
    pub fn resolve_id_with<F>(&self, token: impl Into<String>, callback: F) -> Result<(), EngineError>
    where
        F: FnOnce(Result<Value, ResolveError>) + Send + 'static,
    {
        let engine = self.clone();
        let token = token.into();
        complete_with(async move { engine.resolve_id(&token).await }, callback)
    }

    /// Callback form of [`HelperEngine::resolve_ids`].
    pub fn resolve_ids_with<F>(&self, value: Value, callback: F) -> Result<(), EngineError>
    where
        F: FnOnce(Result<Value, ResolveError>) + Send + 'static,
    {
        let engine = self.clone();
        complete_with(async move { engine.resolve_ids(&value).await }, callback)
    }

    /// Callback form of [`HelperEngine::resolve_args`].
    pub fn resolve_args_with<F>(&self, args: Vec<Value>, callback: F) -> Result<(), EngineError>
    where
        F: FnOnce(Result<Vec<Value>, ResolveError>) + Send + 'static,
    {
        let engine = self.clone();
        complete_with(async move { engine.resolve_args(&args).await }, callback)
    }

    /// Callback form of [`HelperEngine::resolve_object`].
    pub fn resolve_object_with<F>(&self, object: Object, callback: F) -> Result<(), EngineError>
    where
        F: FnOnce(Result<Object, ResolveError>) + Send + 'static,
    {
        let engine = self.clone();
        complete_with(async move { engine.resolve_object(&object).await }, callback)
    }

    /// Returns true when `value` contains a token for this engine's prefix,
    /// inside strings at any depth of arrays and objects.
    ///
    /// Tokens of unknown or other instances count as long as the prefix matches.
    pub fn has_async_id(&self, value: &Value) -> bool {
        contains_token(&self.state.codec, value, &mut Vec::new())
    }

    async fn resolve_token(&self, token: &str, path: &mut ResolutionPath) -> Outcome {
        let record = self
            .state
            .store
            .get(token)
            .ok_or_else(|| ResolveError::unknown_token(token))?;

        if let Some(outcome) = record.outcome() {
            debug!(token, helper = record.helper_name(), "returning cached outcome");
            return outcome.clone();
        }
        if path.is_resolving(token) {
            debug!(token, helper = record.helper_name(), "token refers back to itself");
            return Err(ResolveError::circular_reference(path.helper()));
        }

        loop {
            match self.state.store.claim(&record, path.resolver) {
                Claim::Ready(outcome) => return outcome,
                Claim::Run(execution) => {
                    let outcome = self.execute(&record, path).await;
                    return execution.finish(outcome);
                }
                Claim::Wait(settled) => {
                    debug!(token, helper = record.helper_name(), "waiting for another resolution");
                    settled.await;
                }
                Claim::Deadlock => {
                    debug!(token, helper = record.helper_name(), "resolutions wait on each other");
                    return Err(ResolveError::circular_reference(path.helper()));
                }
            }
        }
    }

    fn begin_resolution(&self) -> ResolutionPath {
        ResolutionPath::new(self.state.next_resolver())
    }

    async fn execute(&self, record: &InvocationRecord, path: &mut ResolutionPath) -> Outcome {
        path.enter_invocation(record);
        let outcome = self.run_helper(record, path).await;
        path.leave_invocation();

        match &outcome {
            Ok(_) => debug!(token = %record.token(), helper = record.helper_name(), "deferred helper resolved"),
            Err(error) => debug!(
                token = %record.token(),
                helper = record.helper_name(),
                error = %error,
                "deferred helper resolution failed"
            ),
        }
        outcome
    }

    async fn run_helper(&self, record: &InvocationRecord, path: &mut ResolutionPath) -> Outcome {
        let args = self.resolve_sequence(record.args(), path).await?;

        debug!(
            token = %record.token(),
            helper = record.helper_name(),
            argument_count = args.len(),
            "invoking helper"
        );
        let invocation = AssertUnwindSafe(record.helper().invoke(args)).catch_unwind();
        let value = invocation.await.unwrap_or_else(|panic| Err(helper_panic(panic.as_ref()))).map_err(|error| {
            let failure = ResolveError::helper_execution(record.helper_name(), &error);
            warn!(token = %record.token(), error = %failure, "helper failed");
            failure
        })?;

        if self.has_async_id(&value) {
            self.resolve_value(&value, path).await
        } else {
            Ok(value)
        }
    }

    fn resolve_value<'a>(&'a self, value: &'a Value, path: &'a mut ResolutionPath) -> BoxFuture<'a, Outcome> {
        Box::pin(async move {
            match value {
                Value::String(text) => self.resolve_text(text, path).await,
                Value::Array(array) => {
                    path.enter_container(array.identity())?;
                    let items = array.snapshot();
                    let resolved = self.resolve_sequence(&items, path).await;
                    path.leave_container();
                    resolved.map(Value::from)
                }
                Value::Object(object) => self.resolve_mapping(object, path).await.map(Value::Object),
                other => Ok(other.clone()),
            }
        })
    }

    async fn resolve_text(&self, text: &str, path: &mut ResolutionPath) -> Outcome {
        let segments = self.state.codec.segments(text);
        match segments.as_slice() {
            [Segment::Token(token)] => self.resolve_token(token, path).await,
            [] | [Segment::Literal(_)] => Ok(Value::String(text.to_string())),
            _ => {
                let mut output = String::with_capacity(text.len());
                for segment in &segments {
                    match segment {
                        Segment::Literal(literal) => output.push_str(literal),
                        Segment::Token(token) => {
                            let value = self.resolve_token(token, path).await?;
                            output.push_str(&value.to_printable());
                        }
                    }
                }
                Ok(Value::String(output))
            }
        }
    }

    async fn resolve_sequence(&self, items: &[Value], path: &mut ResolutionPath) -> Result<Vec<Value>, ResolveError> {
        let mut resolved = Vec::with_capacity(items.len());
        for item in items {
            resolved.push(self.resolve_value(item, path).await?);
        }
        Ok(resolved)
    }

    async fn resolve_mapping(&self, object: &Object, path: &mut ResolutionPath) -> Result<Object, ResolveError> {
        path.enter_container(object.identity())?;
        let entries = object.snapshot();
        let resolved = self.resolve_entries(&entries, path).await;
        path.leave_container();
        resolved
    }

    async fn resolve_entries(
        &self,
        entries: &[(String, Value)],
        path: &mut ResolutionPath,
    ) -> Result<Object, ResolveError> {
        let mut resolved = IndexMap::with_capacity(entries.len());
        for (key, value) in entries {
            resolved.insert(key.clone(), self.resolve_value(value, path).await?);
        }
        Ok(Object::from(resolved))
    }
}

/// Turns a panic payload from a helper into an ordinary helper failure.
fn helper_panic(payload: &(dyn Any + Send)) -> anyhow::Error {
    let detail = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");
    anyhow!("helper panicked: {detail}")
}

/// Drives `resolution` without blocking a runtime worker and hands its outcome to `callback`.
fn complete_with<T, Fut, F>(resolution: Fut, callback: F) -> Result<(), EngineError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, ResolveError>> + Send + 'static,
    F: FnOnce(Result<T, ResolveError>) + Send + 'static,
{
    drive_detached(async move { callback(resolution.await) })
        .map_err(|error| EngineError::runtime(format!("failed to drive resolution: {error:#}")))
}

fn contains_token(codec: &TokenCodec, value: &Value, active: &mut Vec<usize>) -> bool {
    match value {
        Value::String(text) => codec.matches(text),
        Value::Array(array) => {
            if active.contains(&array.identity()) {
                return false;
            }
            active.push(array.identity());
            let found = array.snapshot().iter().any(|item| contains_token(codec, item, active));
            active.pop();
            found
        }
        Value::Object(object) => {
            if active.contains(&object.identity()) {
                return false;
            }
            active.push(object.identity());
            let found = object
                .snapshot()
                .iter()
                .any(|(_, item)| contains_token(codec, item, active));
            active.pop();
            found
        }
        _ => false,
    }
}
