//! Helper functions and the completion contract for asynchronous helpers.
//!
//! Whether a helper is synchronous or asynchronous is fixed when it is built
//! ([`Helper::sync`] / [`Helper::asynchronous`]) and never inferred from its
//! shape. Synchronous helpers return their value directly. Asynchronous
//! helpers receive a [`Completion`] as their trailing parameter and signal it
//! exactly once, possibly from another task; an `Err` returned from the helper
//! body itself counts as a failure raised before any completion.

use std::{fmt, sync::Arc};

use anyhow::{Result, anyhow};
use deferred_types::Value;
use tokio::sync::oneshot;

type SyncHelperFn = dyn Fn(Vec<Value>) -> Result<Value> + Send + Sync;
type AsyncHelperFn = dyn Fn(Vec<Value>, Completion) -> Result<()> + Send + Sync;

/// A callable helper.
///
/// Cloning shares the underlying function; [`Helper::ptr_eq`] tells whether two
/// handles are the same helper.
#[derive(Clone)]
pub enum Helper {
    Sync(Arc<SyncHelperFn>),
    Async(Arc<AsyncHelperFn>),
}

/// One-shot completion handed to asynchronous helpers.
///
/// Consuming `self` guarantees the outcome is delivered at most once.
pub struct Completion {
    deliver: Box<dyn FnOnce(Result<Value>) + Send>,
}

impl Completion {
    /// Completion that forwards the outcome to `callback`.
    pub fn new(callback: impl FnOnce(Result<Value>) + Send + 'static) -> Self {
        Self {
            deliver: Box::new(callback),
        }
    }

    pub(crate) fn channel() -> (Self, oneshot::Receiver<Result<Value>>) {
        let (sender, receiver) = oneshot::channel();
        let completion = Self::new(move |outcome| {
            // The receiver is gone only when the waiting resolution was dropped.
            let _ = sender.send(outcome);
        });
        (completion, receiver)
    }

    pub fn complete(self, outcome: Result<Value>) {
        (self.deliver)(outcome)
    }

    pub fn succeed(self, value: impl Into<Value>) {
        self.complete(Ok(value.into()))
    }

    pub fn fail(self, error: impl Into<anyhow::Error>) {
        self.complete(Err(error.into()))
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion(..)")
    }
}

impl Helper {
    pub fn sync<F>(function: F) -> Self
    where
        F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Helper::Sync(Arc::new(function))
    }

    pub fn asynchronous<F>(function: F) -> Self
    where
        F: Fn(Vec<Value>, Completion) -> Result<()> + Send + Sync + 'static,
    {
        Helper::Async(Arc::new(function))
    }

    pub fn is_async(&self) -> bool {
        matches!(self, Helper::Async(_))
    }

    /// Returns true when both handles share the same function.
    pub fn ptr_eq(&self, other: &Helper) -> bool {
        match (self, other) {
            (Helper::Sync(left), Helper::Sync(right)) => Arc::ptr_eq(left, right),
            (Helper::Async(left), Helper::Async(right)) => Arc::ptr_eq(left, right),
            _ => false,
        }
    }

    /// Runs a synchronous helper and returns its value.
    ///
    /// # Errors
    ///
    /// Returns the helper's own error, or an error for asynchronous helpers,
    /// which need [`Helper::call_with`] or [`Helper::invoke`].
    pub fn call(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Helper::Sync(function) => function(args),
            Helper::Async(_) => Err(anyhow!("asynchronous helper must be called with a completion")),
        }
    }

    /// Runs the helper in completion style.
    ///
    /// Synchronous helpers deliver their outcome to `completion` before this returns.
    pub fn call_with(&self, args: Vec<Value>, completion: Completion) -> Result<()> {
        match self {
            Helper::Sync(function) => {
                completion.complete(function(args));
                Ok(())
            }
            Helper::Async(function) => function(args, completion),
        }
    }

    /// Runs the helper and waits for its outcome, whichever kind it is.
    ///
    /// An asynchronous helper that drops its completion without signalling it
    /// yields an error instead of waiting forever.
    pub async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        match self {
            Helper::Sync(function) => function(args),
            Helper::Async(function) => {
                let (completion, outcome) = Completion::channel();
                function(args, completion)?;
                outcome
                    .await
                    .map_err(|_| anyhow!("helper dropped its completion without reporting a result"))?
            }
        }
    }
}

impl fmt::Debug for Helper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Helper::Sync(_) => f.write_str("Helper::Sync(..)"),
            Helper::Async(_) => f.write_str("Helper::Async(..)"),
        }
    }
}

impl From<Helper> for Value {
    /// Carries a helper as an opaque argument, e.g. an iterator for a mapping helper.
    fn from(helper: Helper) -> Self {
        Value::opaque(helper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn upper() -> Helper {
        Helper::sync(|args| {
            let text = args.first().and_then(Value::as_str).unwrap_or_default();
            Ok(Value::from(text.to_uppercase()))
        })
    }

    #[test]
    fn sync_helpers_return_directly() {
        let helper = upper();
        assert!(!helper.is_async());
        assert_eq!(helper.call(vec!["doowb".into()]).expect("value"), Value::from("DOOWB"));
    }

    #[test]
    fn async_helpers_refuse_direct_calls() {
        let helper = Helper::asynchronous(|_, completion| {
            completion.succeed("never");
            Ok(())
        });
        assert!(helper.is_async());
        assert!(helper.call(Vec::new()).is_err());
    }

    #[test]
    fn call_with_delivers_sync_results_immediately() {
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        upper()
            .call_with(
                vec!["doowb".into()],
                Completion::new(move |outcome| {
                    *sink.lock().expect("sink lock") = outcome.ok();
                }),
            )
            .expect("called");
        assert_eq!(*seen.lock().expect("seen lock"), Some(Value::from("DOOWB")));
    }

    #[tokio::test]
    async fn invoke_waits_for_a_completion_from_another_task() {
        let helper = Helper::asynchronous(|args, completion| {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                let text = args.first().and_then(Value::as_str).unwrap_or_default().to_uppercase();
                completion.succeed(text);
            });
            Ok(())
        });
        assert_eq!(helper.invoke(vec!["doowb".into()]).await.expect("value"), Value::from("DOOWB"));
    }

    #[tokio::test]
    async fn invoke_reports_thrown_returned_and_dropped_failures() {
        let thrown = Helper::asynchronous(|_, _| Err(anyhow!("UPPER Error")));
        assert_eq!(thrown.invoke(Vec::new()).await.expect_err("thrown").to_string(), "UPPER Error");

        let returned = Helper::asynchronous(|_, completion| {
            completion.fail(anyhow!("UPPER Error"));
            Ok(())
        });
        assert_eq!(returned.invoke(Vec::new()).await.expect_err("returned").to_string(), "UPPER Error");

        let dropped = Helper::asynchronous(|_, completion| {
            drop(completion);
            Ok(())
        });
        let error = dropped.invoke(Vec::new()).await.expect_err("dropped");
        assert!(error.to_string().contains("dropped its completion"));
    }

    #[test]
    fn clones_share_identity_and_travel_as_opaque_values() {
        let helper = upper();
        assert!(helper.ptr_eq(&helper.clone()));
        assert!(!helper.ptr_eq(&upper()));

        let carried = Value::from(helper.clone());
        let recovered = carried.downcast_ref::<Helper>().expect("helper inside value");
        assert!(recovered.ptr_eq(&helper));
    }
}
