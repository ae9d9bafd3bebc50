//! Data warehouse sessions.
//!
//! A session is opened per mention, used for the analyst token, the generated SQL
//! and the summary call, and then released.  [`WarehouseSession`] guarantees the
//! release: it is closed explicitly at the end of the flow, and from `Drop` if the
//! flow never got there.

pub mod snowflake;

use std::{ops::Deref, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::base::types::{Res, ResultTable, Void};

// Traits.

/// Generic warehouse client trait that clients must implement.
///
/// The client itself holds only configuration; every call to [`GenericWarehouseClient::connect`]
/// opens a fresh session.
#[async_trait]
pub trait GenericWarehouseClient: Send + Sync + 'static {
    /// Open a new authenticated session.
    async fn connect(&self) -> Res<WarehouseSession>;
}

/// An open, authenticated warehouse session.
#[async_trait]
pub trait GenericWarehouseSession: Send + Sync + 'static {
    /// The session token, usable as a bearer credential against the warehouse's REST APIs.
    fn token(&self) -> &str;

    /// Execute a statement and pull the full result into memory.
    ///
    /// `params` are bound positionally to `?` placeholders in `sql`.
    async fn query(&self, sql: &str, params: &[String]) -> Res<ResultTable>;

    /// Log the session out.
    async fn close(&self) -> Void;
}

// Structs.

/// Warehouse client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct WarehouseClient {
    inner: Arc<dyn GenericWarehouseClient>,
}

impl Deref for WarehouseClient {
    type Target = dyn GenericWarehouseClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl WarehouseClient {
    pub fn new(inner: Arc<dyn GenericWarehouseClient>) -> Self {
        Self { inner }
    }
}

/// A scoped warehouse session.
///
/// Call [`WarehouseSession::close`] when done.  A session dropped without being closed
/// is logged out on a background task.
pub struct WarehouseSession {
    inner: Option<Arc<dyn GenericWarehouseSession>>,
}

impl WarehouseSession {
    pub fn new(inner: Arc<dyn GenericWarehouseSession>) -> Self {
        Self { inner: Some(inner) }
    }

    fn inner(&self) -> Res<&dyn GenericWarehouseSession> {
        self.inner.as_deref().ok_or_else(|| anyhow!("Warehouse session is already closed."))
    }

    /// The session token.
    pub fn token(&self) -> Res<&str> {
        Ok(self.inner()?.token())
    }

    /// Execute a statement without bind parameters.
    pub async fn query(&self, sql: &str) -> Res<ResultTable> {
        self.inner()?.query(sql, &[]).await
    }

    /// Execute a statement with positional bind parameters.
    pub async fn query_with_params(&self, sql: &str, params: &[String]) -> Res<ResultTable> {
        self.inner()?.query(sql, params).await
    }

    /// Release the session.  Failures are logged, not returned: there is nothing the caller could do.
    pub async fn close(mut self) {
        if let Some(inner) = self.inner.take() {
            match inner.close().await {
                Ok(()) => debug!("Warehouse session closed."),
                Err(err) => warn!("Failed to close warehouse session: {}", err),
            }
        }
    }
}

impl Drop for WarehouseSession {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };

        warn!("Warehouse session dropped without being closed; closing in the background.");

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = inner.close().await {
                        warn!("Failed to close warehouse session: {}", err);
                    }
                });
            }
            Err(_) => warn!("No runtime available to close the warehouse session."),
        }
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GenericWarehouseSession for CountingSession {
        fn token(&self) -> &str {
            "token"
        }

        async fn query(&self, _sql: &str, params: &[String]) -> Res<ResultTable> {
            Ok(ResultTable::new(vec!["PARAMS".to_string()], vec![vec![Some(params.len().to_string())]]))
        }

        async fn close(&self) -> Void {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn session() -> (WarehouseSession, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let session = WarehouseSession::new(Arc::new(CountingSession { closes: closes.clone() }));
        (session, closes)
    }

    #[tokio::test]
    async fn test_session_delegates() {
        let (session, _) = session();

        assert_eq!(session.token().unwrap(), "token");
        assert_eq!(session.query("select 1").await.unwrap().first_value(), Some("0"));
        assert_eq!(session.query_with_params("select ?", &["a".to_string()]).await.unwrap().first_value(), Some("1"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_explicit_close_closes_once() {
        let (session, closes) = session();

        session.close().await;

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_in_background() {
        let (session, closes) = session();

        drop(session);

        // Give the background task a chance to run.
        for _ in 0..50 {
            if closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
