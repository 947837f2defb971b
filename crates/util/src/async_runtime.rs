//! Async runtime helpers for callers outside an async context.
//!
//! Resolution work is expressed as futures. These helpers let callback-style
//! callers drive those futures, reusing the current Tokio runtime when one is
//! available.

use anyhow::{Context, Result};
use std::future::Future;
use tokio::runtime::{Builder, Handle};
use tracing::debug;

/// Drive a future without waiting on it.
///
/// # Arguments
/// - `future`: The future to drive; its output is discarded.
///
/// # Returns
/// Returns an error only if a Tokio runtime cannot be created.
///
/// # Notes
/// - Inside a Tokio runtime (either flavor) the future is spawned and this
///   returns immediately.
/// - Outside one, the future runs to completion on a private current-thread
///   runtime before this returns, so any completion callback it carries has
///   already fired.
pub fn drive_detached<F>(future: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            Ok(())
        }
        Err(_) => {
            debug!("no tokio runtime on this thread; driving future inline");
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build a current-thread tokio runtime")?;
            runtime.block_on(future);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    #[test]
    fn drive_detached_completes_before_returning_outside_a_runtime() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        drive_detached(async move {
            tokio::task::yield_now().await;
            flag.store(true, Ordering::SeqCst);
        })
        .expect("driven");
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn drive_detached_spawns_on_a_current_thread_runtime() {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        drive_detached(async move {
            let _ = sender.send("spawned");
        })
        .expect("spawned");
        assert_eq!(receiver.await.expect("spawned task result"), "spawned");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn drive_detached_spawns_on_a_multi_thread_runtime() {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        drive_detached(async move {
            tokio::task::yield_now().await;
            let _ = sender.send(7);
        })
        .expect("spawned");
        assert_eq!(receiver.await.expect("spawned task result"), 7);
    }
}
