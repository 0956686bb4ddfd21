//! Dedicated worker threads for namespace-affine work.
//!
//! Each call gets a fresh OS thread that runs exactly one closure and then
//! exits. No two namespace operations ever share a thread, and a thread
//! whose namespace could not be restored is never handed back to a pool.

use netfab_common::{NetfabError, NetfabResult};
use tokio::sync::oneshot;

/// Run `f` on a new thread named `netfab-ns-<op>` and await its result.
///
/// The caller's tracing span is entered on the worker.
///
/// # Errors
///
/// Returns `f`'s error, or [`NetfabError::Internal`] if the thread could
/// not be spawned or panicked.
pub async fn run<T, F>(op: &str, f: F) -> NetfabResult<T>
where
    F: FnOnce() -> NetfabResult<T> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let span = tracing::Span::current();

    std::thread::Builder::new()
        .name(format!("netfab-ns-{op}"))
        .spawn(move || {
            let _entered = span.enter();
            // The receiver only disappears if the caller was dropped.
            let _ = tx.send(f());
        })
        .map_err(|e| NetfabError::Internal {
            message: format!("failed to spawn namespace worker for {op}: {e}"),
        })?;

    rx.await.map_err(|_| NetfabError::Internal {
        message: format!("namespace worker for {op} exited without a result"),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_on_a_separate_named_thread() {
        let caller = std::thread::current().id();
        let (id, name) = run("probe", || {
            let t = std::thread::current();
            Ok((t.id(), t.name().map(str::to_string)))
        })
        .await
        .unwrap();

        assert_ne!(id, caller);
        assert_eq!(name.as_deref(), Some("netfab-ns-probe"));
    }

    #[tokio::test]
    async fn each_call_gets_a_fresh_thread() {
        let first = run("a", || Ok(std::thread::current().id())).await.unwrap();
        let second = run("b", || Ok(std::thread::current().id())).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn propagates_errors() {
        let result: NetfabResult<()> = run("fail", || Err(NetfabError::validation("nope"))).await;
        assert!(matches!(result, Err(NetfabError::Validation { .. })));
    }

    #[tokio::test]
    async fn panics_become_internal_errors() {
        let result: NetfabResult<()> = run("panic", || panic!("worker blew up")).await;
        assert!(matches!(result, Err(NetfabError::Internal { .. })));
    }
}
