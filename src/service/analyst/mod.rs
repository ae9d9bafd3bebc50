pub mod cortex;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{AnalystResponse, Res};

// Traits.

/// Generic text-to-SQL client trait that clients must implement.
///
/// This trait defines the single call the bot makes to an analytics service:
/// a natural-language question goes in, narrative text and (optionally) SQL come out.
#[async_trait]
pub trait GenericAnalystClient: Send + Sync + 'static {
    /// Ask the analytics service a question.
    ///
    /// `session_token` is the warehouse session token used to authenticate the call.
    async fn send_message(&self, question: &str, session_token: &str) -> Res<AnalystResponse>;
}

// Structs.

/// Analyst client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct AnalystClient {
    inner: Arc<dyn GenericAnalystClient>,
}

impl Deref for AnalystClient {
    type Target = dyn GenericAnalystClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl AnalystClient {
    pub fn new(inner: Arc<dyn GenericAnalystClient>) -> Self {
        Self { inner }
    }
}
