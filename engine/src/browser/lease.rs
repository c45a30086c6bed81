//! Scoped ownership of a browsing session
//!
//! A `BrowserLease` is acquired once per navigation session. `release()`
//! closes the session and consumes the lease, so it cannot run twice. If a
//! lease is dropped unreleased (a cancelled future, a panic unwinding), the
//! close is spawned on the current Tokio runtime instead.
//!
//! Opening, observing and closing all run under the lease's deadline, so a
//! hung driver cannot hold a session open forever.

use std::sync::Arc;
use std::time::Duration;

use super::{within, BrowserDriver, BrowserError, PageState, SessionHandle};

pub struct BrowserLease {
    driver: Arc<dyn BrowserDriver>,
    session: SessionHandle,
    deadline: Duration,
    released: bool,
}

impl BrowserLease {
    /// Open a session on `driver`; each driver call gets `deadline`
    pub async fn acquire(
        driver: Arc<dyn BrowserDriver>,
        deadline: Duration,
    ) -> Result<Self, BrowserError> {
        let session = within(deadline, "opening the session", driver.open_session()).await?;
        Ok(Self {
            driver,
            session,
            deadline,
            released: false,
        })
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.session
    }

    /// Observe the current page
    pub async fn snapshot(&self) -> Result<PageState, BrowserError> {
        within(self.deadline, "snapshot", self.driver.snapshot(&self.session)).await
    }

    /// Close the session
    pub async fn release(mut self) -> Result<(), BrowserError> {
        self.released = true;
        within(
            self.deadline,
            "closing the session",
            self.driver.close_session(&self.session),
        )
        .await
    }
}

impl Drop for BrowserLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let driver = Arc::clone(&self.driver);
        let session = self.session.clone();
        let deadline = self.deadline;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!("Session {} dropped without release; closing in background", session);
                runtime.spawn(async move {
                    let close = within(deadline, "closing the session", driver.close_session(&session));
                    if let Err(e) = close.await {
                        tracing::warn!("Background close of session {} failed: {}", session, e);
                    }
                });
            }
            Err(_) => {
                tracing::error!("Session {} leaked: no runtime to close it on", session);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ActionScript;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DEADLINE: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct CountingDriver {
        opened: AtomicUsize,
        closed: AtomicUsize,
        hang_open: bool,
        hang_close: bool,
    }

    #[async_trait]
    impl BrowserDriver for CountingDriver {
        async fn open_session(&self) -> Result<SessionHandle, BrowserError> {
            if self.hang_open {
                std::future::pending::<()>().await;
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(SessionHandle::new(format!("s{}", n)))
        }

        async fn execute(
            &self,
            _session: &SessionHandle,
            _script: &ActionScript,
        ) -> Result<PageState, BrowserError> {
            Ok(PageState::default())
        }

        async fn snapshot(&self, _session: &SessionHandle) -> Result<PageState, BrowserError> {
            Ok(PageState::default())
        }

        async fn close_session(&self, _session: &SessionHandle) -> Result<(), BrowserError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            if self.hang_close {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_release_closes_once() {
        let driver = Arc::new(CountingDriver::default());
        let lease = BrowserLease::acquire(Arc::clone(&driver) as Arc<dyn BrowserDriver>, DEADLINE)
            .await
            .unwrap();
        assert_eq!(lease.handle().id(), "s0");

        lease.release().await.unwrap();
        // Give any stray background close a chance to run
        tokio::task::yield_now().await;

        assert_eq!(driver.opened.load(Ordering::SeqCst), 1);
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_in_background() {
        let driver = Arc::new(CountingDriver::default());
        {
            let _lease = BrowserLease::acquire(Arc::clone(&driver) as Arc<dyn BrowserDriver>, DEADLINE)
                .await
                .unwrap();
        }

        for _ in 0..10 {
            if driver.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hung_open_times_out() {
        let driver = Arc::new(CountingDriver {
            hang_open: true,
            ..CountingDriver::default()
        });
        let result =
            BrowserLease::acquire(driver as Arc<dyn BrowserDriver>, Duration::from_millis(50)).await;

        assert!(matches!(result, Err(BrowserError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_hung_close_times_out() {
        let driver = Arc::new(CountingDriver {
            hang_close: true,
            ..CountingDriver::default()
        });
        let lease = BrowserLease::acquire(
            Arc::clone(&driver) as Arc<dyn BrowserDriver>,
            Duration::from_millis(50),
        )
        .await
        .unwrap();

        assert!(matches!(lease.release().await, Err(BrowserError::Timeout(_))));
        assert_eq!(driver.closed.load(Ordering::SeqCst), 1);
    }
}
