/// Client request coordinator
///
/// Wraps authenticated calls: on `Unauthenticated` it refreshes the session
/// once and retries the call once. Concurrent failures share a single
/// in-flight refresh; a failed refresh terminates the session.
use super::{ClientError, ClientResult};
use async_trait::async_trait;
use std::{
    future::Future,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};
use tokio::sync::Mutex;

/// Performs the refresh exchange with the server
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> ClientResult<()>;
}

/// Coordinator shared by every call of one client session
pub struct RequestCoordinator<R> {
    refresher: R,
    /// Number of completed refreshes
    generation: AtomicU64,
    terminated: AtomicBool,
    refresh_lock: Mutex<()>,
}

impl<R: Refresher> RequestCoordinator<R> {
    pub fn new(refresher: R) -> Self {
        Self {
            refresher,
            generation: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn refresher(&self) -> &R {
        &self.refresher
    }

    /// Whether a refresh failed and the user has to log in again
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Start over after a fresh login
    pub fn reset(&self) {
        self.terminated.store(false, Ordering::SeqCst);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Run an authenticated call with refresh-and-retry-once semantics
    pub async fn execute<T, F, Fut>(&self, call: F) -> ClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        if self.is_terminated() {
            return Err(ClientError::SessionExpired);
        }

        let observed = self.generation();
        match call().await {
            Err(ClientError::Unauthenticated) => {}
            other => return other,
        }

        self.refresh_after(observed).await?;
        call().await
    }

    /// Refresh unless another caller already did so since `observed`
    async fn refresh_after(&self, observed: u64) -> ClientResult<()> {
        let _guard = self.refresh_lock.lock().await;

        if self.is_terminated() {
            return Err(ClientError::SessionExpired);
        }
        if self.generation() != observed {
            tracing::debug!("session refreshed while waiting, retrying");
            return Ok(());
        }

        match self.refresher.refresh().await {
            Ok(()) => {
                self.generation.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(generation = self.generation(), "session refreshed");
                Ok(())
            }
            Err(e) => {
                self.terminated.store(true, Ordering::SeqCst);
                tracing::warn!("session refresh failed: {}", e);
                Err(ClientError::SessionExpired)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize},
        Arc,
    };
    use std::time::Duration;

    /// Refresher that counts calls and flips a shared "valid session" flag
    struct MockRefresher {
        calls: AtomicUsize,
        succeed: bool,
        session_valid: Arc<AtomicBool>,
    }

    impl MockRefresher {
        fn new(succeed: bool, session_valid: Arc<AtomicBool>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                succeed,
                session_valid,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresher for MockRefresher {
        async fn refresh(&self) -> ClientResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.succeed {
                self.session_valid.store(true, Ordering::SeqCst);
                Ok(())
            } else {
                Err(ClientError::Unauthenticated)
            }
        }
    }

    async fn authed_call(session_valid: &AtomicBool, attempts: &AtomicUsize) -> ClientResult<&'static str> {
        attempts.fetch_add(1, Ordering::SeqCst);
        if session_valid.load(Ordering::SeqCst) {
            Ok("ok")
        } else {
            Err(ClientError::Unauthenticated)
        }
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let valid = Arc::new(AtomicBool::new(true));
        let coordinator = RequestCoordinator::new(MockRefresher::new(true, valid.clone()));
        let attempts = AtomicUsize::new(0);

        let result = coordinator.execute(|| authed_call(&valid, &attempts)).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresher().calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_then_retry_once() {
        let valid = Arc::new(AtomicBool::new(false));
        let coordinator = RequestCoordinator::new(MockRefresher::new(true, valid.clone()));
        let attempts = AtomicUsize::new(0);

        let result = coordinator.execute(|| authed_call(&valid, &attempts)).await;
        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.refresher().calls(), 1);
        assert_eq!(coordinator.generation(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_terminates_session() {
        let valid = Arc::new(AtomicBool::new(false));
        let coordinator = RequestCoordinator::new(MockRefresher::new(false, valid.clone()));
        let attempts = AtomicUsize::new(0);

        let result = coordinator.execute(|| authed_call(&valid, &attempts)).await;
        assert!(matches!(result, Err(ClientError::SessionExpired)));
        assert!(coordinator.is_terminated());

        // Later calls short-circuit without touching the server
        let again = coordinator.execute(|| authed_call(&valid, &attempts)).await;
        assert!(matches!(again, Err(ClientError::SessionExpired)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.refresher().calls(), 1);

        coordinator.reset();
        assert!(!coordinator.is_terminated());
    }

    #[tokio::test]
    async fn test_other_errors_untouched() {
        let valid = Arc::new(AtomicBool::new(true));
        let coordinator = RequestCoordinator::new(MockRefresher::new(true, valid));

        let result: ClientResult<()> = coordinator
            .execute(|| async {
                Err(ClientError::Api {
                    status: 403,
                    message: "Forbidden".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(ClientError::Api { status: 403, .. })));
        assert_eq!(coordinator.refresher().calls(), 0);
    }

    #[tokio::test]
    async fn test_retry_failure_does_not_refresh_again() {
        let valid = Arc::new(AtomicBool::new(false));
        let coordinator = RequestCoordinator::new(MockRefresher::new(true, valid));
        let attempts = AtomicUsize::new(0);
        let counter = &attempts;

        let result: ClientResult<()> = coordinator
            .execute(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Unauthenticated)
            })
            .await;
        assert!(matches!(result, Err(ClientError::Unauthenticated)));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.refresher().calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_refresh() {
        let valid = Arc::new(AtomicBool::new(false));
        let coordinator = Arc::new(RequestCoordinator::new(MockRefresher::new(true, valid.clone())));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let valid = valid.clone();
            handles.push(tokio::spawn(async move {
                let attempts = AtomicUsize::new(0);
                coordinator
                    .execute(|| authed_call(&valid, &attempts))
                    .await
                    .map(|_| ())
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(coordinator.refresher().calls(), 1);
        assert_eq!(coordinator.generation(), 1);
    }
}
