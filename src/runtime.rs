//! Runtime services and shared state for the analyst-bot.

use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{Res, Void},
    },
    service::{analyst::AnalystClient, chat::ChatClient, summarizer::Summarizer, warehouse::WarehouseClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the service clients and configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The warehouse client instance.
    pub warehouse: WarehouseClient,
    /// The analyst client instance.
    pub analyst: AnalystClient,
    /// The summarizer, if summaries are enabled.
    pub summarizer: Option<Summarizer>,
    /// The chat client instance.
    pub chat: ChatClient,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the warehouse client.
        let warehouse = WarehouseClient::snowflake(&config)?;

        // Initialize the analyst client.
        let analyst = AnalystClient::cortex(&config)?;

        // Initialize the summarizer.
        let summarizer = Summarizer::from_config(&config);

        info!("Summaries are {}.", if summarizer.is_some() { "enabled" } else { "disabled" });

        // Initialize the slack client.
        let chat = ChatClient::slack(&config, warehouse.clone(), analyst.clone(), summarizer.clone()).await?;

        Ok(Self {
            config,
            warehouse,
            analyst,
            summarizer,
            chat,
        })
    }

    pub async fn start(&self) -> Void {
        self.chat.start().await
    }
}
