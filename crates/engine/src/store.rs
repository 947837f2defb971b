//! Invocation records for deferred helper calls.
//!
//! A record is created unresolved when a wrapped helper is called and is
//! resolved at most once, to a value or to an error. Concurrent resolutions of
//! the same record share a single helper run: the first resolver to claim a
//! record runs it and the others wait for its outcome.
//!
//! The store also tracks which resolver is running each record and which
//! record each waiting resolver is blocked on. A resolver about to wait on a
//! record whose chain of owners leads back to itself is told the wait would
//! never finish, so cycles spanning several tasks fail instead of hanging.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use deferred_types::Value;
use tokio::sync::{Notify, futures::Notified};

use crate::{error::ResolveError, helper::Helper, token::Token};

/// Final state of a resolved invocation.
pub type Outcome = Result<Value, ResolveError>;

/// Identity of one top-level resolution call.
pub(crate) type ResolverId = u64;

/// Bookkeeping for one wrapped-helper call.
#[derive(Debug)]
pub struct InvocationRecord {
    token: Token,
    helper_name: String,
    helper: Helper,
    /// Arguments exactly as passed; shared containers are kept by reference.
    args: Vec<Value>,
    outcome: OnceLock<Outcome>,
    settled: Notify,
}

impl InvocationRecord {
    pub(crate) fn new(token: Token, helper_name: impl Into<String>, helper: Helper, args: Vec<Value>) -> Self {
        Self {
            token,
            helper_name: helper_name.into(),
            helper,
            args,
            outcome: OnceLock::new(),
            settled: Notify::new(),
        }
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn helper_name(&self) -> &str {
        &self.helper_name
    }

    pub fn helper(&self) -> &Helper {
        &self.helper
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn is_resolved(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    pub fn value(&self) -> Option<&Value> {
        self.outcome.get()?.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ResolveError> {
        self.outcome.get()?.as_ref().err()
    }
}

/// What a resolver should do with a record it needs.
pub(crate) enum Claim<'a> {
    /// The record already has an outcome.
    Ready(Outcome),
    /// The resolver now owns the record and must run it.
    Run(Execution<'a>),
    /// Another resolver is running the record; await this, then claim again.
    Wait(Notified<'a>),
    /// Waiting would close a cycle of resolvers waiting on each other.
    Deadlock,
}

/// Ownership of a running record.
///
/// Dropping it without [`Execution::finish`] releases the record unresolved
/// so a waiting resolver can take it over.
pub(crate) struct Execution<'a> {
    store: &'a InvocationStore,
    record: &'a InvocationRecord,
    finished: bool,
}

impl Execution<'_> {
    /// Stores `outcome` on the record and wakes every waiting resolver.
    pub(crate) fn finish(mut self, outcome: Outcome) -> Outcome {
        {
            let mut tracker = self.store.tracker();
            let _ = self.record.outcome.set(outcome.clone());
            tracker.owners.remove(&self.record.token);
        }
        self.finished = true;
        self.record.settled.notify_waiters();
        outcome
    }
}

impl Drop for Execution<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.store.tracker().owners.remove(&self.record.token);
            self.record.settled.notify_waiters();
        }
    }
}

/// Who runs which record, and who waits on which record.
#[derive(Debug, Default)]
struct WaitTracker {
    owners: HashMap<Token, ResolverId>,
    waits: HashMap<ResolverId, Token>,
}

impl WaitTracker {
    /// Follows owner -> awaited record -> owner from `token` and reports
    /// whether the chain reaches `resolver`.
    fn leads_back_to(&self, token: &Token, resolver: ResolverId) -> bool {
        let mut visited = HashSet::new();
        let mut current = self.owners.get(token).copied();
        while let Some(owner) = current {
            if owner == resolver {
                return true;
            }
            if !visited.insert(owner) {
                return false;
            }
            current = self.waits.get(&owner).and_then(|awaited| self.owners.get(awaited)).copied();
        }
        false
    }
}

/// Records for one engine instance, keyed by token.
#[derive(Debug, Default)]
pub struct InvocationStore {
    records: Mutex<HashMap<Token, Arc<InvocationRecord>>>,
    tracker: Mutex<WaitTracker>,
}

impl InvocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: InvocationRecord) -> Arc<InvocationRecord> {
        let record = Arc::new(record);
        self.lock().insert(record.token().clone(), Arc::clone(&record));
        record
    }

    pub fn get(&self, token: &str) -> Option<Arc<InvocationRecord>> {
        self.lock().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of records that have not been resolved yet.
    pub fn pending(&self) -> usize {
        self.lock().values().filter(|record| !record.is_resolved()).count()
    }

    pub fn clear(&self) {
        self.lock().clear();
        let mut tracker = self.tracker();
        tracker.owners.clear();
        tracker.waits.clear();
    }

    /// Decides whether `resolver` reads, runs, or waits for `record`.
    ///
    /// A `Wait` registers `resolver` as blocked on the record until its next claim.
    pub(crate) fn claim<'a>(&'a self, record: &'a InvocationRecord, resolver: ResolverId) -> Claim<'a> {
        let mut tracker = self.tracker();
        tracker.waits.remove(&resolver);

        if let Some(outcome) = record.outcome() {
            return Claim::Ready(outcome.clone());
        }
        if !tracker.owners.contains_key(&record.token) {
            tracker.owners.insert(record.token.clone(), resolver);
            return Claim::Run(Execution {
                store: self,
                record,
                finished: false,
            });
        }
        if tracker.leads_back_to(&record.token, resolver) {
            return Claim::Deadlock;
        }

        // Created under the lock so a `finish` racing with this claim still wakes it.
        let settled = record.settled.notified();
        tracker.waits.insert(resolver, record.token.clone());
        Claim::Wait(settled)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Token, Arc<InvocationRecord>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracker(&self) -> MutexGuard<'_, WaitTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
