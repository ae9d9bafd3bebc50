//! Natural-language summaries of query results.
//!
//! This is an opinionated concrete implementation: the model is hosted by the warehouse
//! itself and called through `snowflake.cortex.complete` on the mention's session, so there
//! is no separate client to abstract over.  Summaries are best-effort; a failure yields an
//! empty summary rather than an error.

use tracing::{error, info, instrument};

use crate::base::{
    config::Config,
    prompts,
    types::{Res, ResultTable},
};
use crate::service::warehouse::WarehouseSession;

/// The statement used to invoke the hosted model; model and prompt are bound as parameters.
pub const COMPLETE_STATEMENT: &str = "select snowflake.cortex.complete(?, ?) as response";

/// Summarizer for query results.
///
/// It is designed to be trivially cloneable.
#[derive(Debug, Clone)]
pub struct Summarizer {
    model: String,
    directive: String,
}

impl Summarizer {
    pub fn new(model: impl Into<String>, directive: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            directive: directive.into(),
        }
    }

    /// Build the summarizer from configuration, if summaries are enabled.
    pub fn from_config(config: &Config) -> Option<Self> {
        config.summary_enabled.then(|| Self::new(&config.summary_model, &config.summary_directive))
    }

    /// The data section handed to the model.
    pub fn data_for_summary(table: &ResultTable) -> String {
        format!("Resulting Data:\n{table}")
    }

    /// Summarize the already-produced answer.
    ///
    /// Returns the trimmed model output, or an empty string if the call fails or returns nothing.
    #[instrument(name = "Summarizer::summarize", skip_all)]
    pub async fn summarize(&self, session: &WarehouseSession, question: &str, sql: &str, data: &str) -> String {
        match self.complete(session, question, sql, data).await {
            Ok(summary) => summary,
            Err(err) => {
                error!("Error generating summary: {:?}", err);
                String::new()
            }
        }
    }

    async fn complete(&self, session: &WarehouseSession, question: &str, sql: &str, data: &str) -> Res<String> {
        let prompt = prompts::build_summary_prompt(&self.directive, question, sql, data);

        info!("Generating summary with model `{}` ...", self.model);

        let result = session.query_with_params(COMPLETE_STATEMENT, &[self.model.clone(), prompt]).await?;

        Ok(result.first_value().map(str::trim).unwrap_or_default().to_string())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::anyhow;
    use async_trait::async_trait;

    use super::*;
    use crate::{
        base::{config::tests::create_test_config, types::Void},
        service::warehouse::GenericWarehouseSession,
    };

    /// A session that answers every query with a fixed outcome and records the parameters.
    struct FixedSession {
        outcome: Result<ResultTable, String>,
        params: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl GenericWarehouseSession for FixedSession {
        fn token(&self) -> &str {
            "token"
        }

        async fn query(&self, sql: &str, params: &[String]) -> Res<ResultTable> {
            assert_eq!(sql, COMPLETE_STATEMENT);
            self.params.lock().unwrap().extend_from_slice(params);
            self.outcome.clone().map_err(|e| anyhow!(e))
        }

        async fn close(&self) -> Void {
            Ok(())
        }
    }

    fn fixed_session(outcome: Result<ResultTable, String>) -> (WarehouseSession, Arc<Mutex<Vec<String>>>) {
        let params = Arc::new(Mutex::new(Vec::new()));
        let session = WarehouseSession::new(Arc::new(FixedSession { outcome, params: params.clone() }));
        (session, params)
    }

    fn single_cell(value: Option<&str>) -> ResultTable {
        ResultTable::new(vec!["RESPONSE".to_string()], vec![vec![value.map(str::to_string)]])
    }

    #[tokio::test]
    async fn test_summarize_trims_first_cell() {
        let summarizer = Summarizer::new("llama3.1-405b", prompts::SUMMARY_DIRECTIVE);
        let (session, params) = fixed_session(Ok(single_cell(Some("\n  EMEA leads sales.  \n"))));

        let summary = summarizer.summarize(&session, "show me sales by region", "SELECT 1", "Resulting Data:\n...").await;

        assert_eq!(summary, "EMEA leads sales.");

        let params = params.lock().unwrap().clone();
        assert_eq!(params[0], "llama3.1-405b");
        assert!(params[1].contains("show me sales by region"));
        assert!(params[1].contains("SELECT 1"));

        session.close().await;
    }

    #[tokio::test]
    async fn test_summarize_failure_is_empty() {
        let summarizer = Summarizer::new("llama3.1-405b", prompts::SUMMARY_DIRECTIVE);
        let (session, _) = fixed_session(Err("model unavailable".to_string()));

        assert_eq!(summarizer.summarize(&session, "q", "S", "D").await, "");

        session.close().await;
    }

    #[tokio::test]
    async fn test_summarize_nothing_returned_is_empty() {
        let summarizer = Summarizer::new("llama3.1-405b", prompts::SUMMARY_DIRECTIVE);

        let (session, _) = fixed_session(Ok(ResultTable::default()));
        assert_eq!(summarizer.summarize(&session, "q", "S", "D").await, "");
        session.close().await;

        let (session, _) = fixed_session(Ok(single_cell(None)));
        assert_eq!(summarizer.summarize(&session, "q", "S", "D").await, "");
        session.close().await;
    }

    #[test]
    fn test_from_config() {
        let mut config = create_test_config();
        assert!(Summarizer::from_config(&config).is_some());

        Arc::make_mut(&mut config.inner).summary_enabled = false;
        assert!(Summarizer::from_config(&config).is_none());
    }

    #[test]
    fn test_data_for_summary() {
        let table = ResultTable::new(vec!["X".to_string()], vec![vec![Some("1".to_string())]]);

        assert_eq!(Summarizer::data_for_summary(&table), "Resulting Data:\nX\n1");
    }
}
