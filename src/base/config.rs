//! Load configuration via `config` crate with env-override support.

use std::{fmt, ops::Deref, sync::Arc};

use anyhow::anyhow;
use serde::Deserialize;

use crate::base::prompts;

use super::types::Res;

/// Default Snowflake host suffix the account identifier is prepended to.
fn default_snowflake_host() -> String {
    "snowflakecomputing.com".to_string()
}

/// Summaries are generated unless explicitly disabled.
fn default_summary_enabled() -> bool {
    true
}

/// Default model passed to `snowflake.cortex.complete`.
fn default_summary_model() -> String {
    "llama3.1-405b".to_string()
}

/// Default summary directive.
fn default_summary_directive() -> String {
    prompts::SUMMARY_DIRECTIVE.to_string()
}

/// Configuration for the analyst-bot application.
///
/// Loaded once at startup, and cloned (cheaply) into every service.
#[derive(Debug, Clone)]
pub struct Config {
    pub inner: Arc<ConfigInner>,
}

impl Deref for Config {
    type Target = ConfigInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

#[derive(Deserialize, Clone, Default)]
pub struct ConfigInner {
    /// Snowflake account identifier (`SNOWFLAKE_ACCOUNT`), e.g. `xy12345.us-east-1`.
    pub snowflake_account: String,
    /// Snowflake login name (`SNOWFLAKE_USER`).
    pub snowflake_user: String,
    /// Snowflake password (`SNOWFLAKE_PASSWORD`).
    pub snowflake_password: String,
    /// Warehouse to run queries on (`SNOWFLAKE_WAREHOUSE`).
    pub snowflake_warehouse: String,
    /// Database holding the semantic model stage (`SNOWFLAKE_DATABASE`).
    pub snowflake_database: String,
    /// Schema holding the semantic model stage (`SNOWFLAKE_SCHEMA`).
    pub snowflake_schema: String,
    /// Role to assume for the session (`SNOWFLAKE_ROLE`).
    pub snowflake_role: String,
    /// Stage holding the semantic model file (`SNOWFLAKE_STAGE`).
    pub snowflake_stage: String,
    /// Host suffix for the account URL (`SNOWFLAKE_HOST`).
    #[serde(default = "default_snowflake_host")]
    pub snowflake_host: String,
    /// Semantic model file name within the stage (`SEMANTIC_FILE`).
    pub semantic_file: String,
    /// Whether to append a generated summary to replies (`SUMMARY_ENABLED`).
    #[serde(default = "default_summary_enabled")]
    pub summary_enabled: bool,
    /// Model used by `snowflake.cortex.complete` for summaries (`SUMMARY_MODEL`).
    #[serde(default = "default_summary_model")]
    pub summary_model: String,
    /// Optional custom summary directive to override the default (`SUMMARY_DIRECTIVE`).
    #[serde(default = "default_summary_directive")]
    pub summary_directive: String,
    /// Slack app token (`SLACK_APP_TOKEN`).
    pub slack_app_token: String,
    /// Slack bot token (`SLACK_BOT_TOKEN`).
    pub slack_bot_token: String,
}

impl fmt::Debug for ConfigInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const REDACTED: &str = "<redacted>";

        f.debug_struct("ConfigInner")
            .field("snowflake_account", &self.snowflake_account)
            .field("snowflake_user", &self.snowflake_user)
            .field("snowflake_password", &REDACTED)
            .field("snowflake_warehouse", &self.snowflake_warehouse)
            .field("snowflake_database", &self.snowflake_database)
            .field("snowflake_schema", &self.snowflake_schema)
            .field("snowflake_role", &self.snowflake_role)
            .field("snowflake_stage", &self.snowflake_stage)
            .field("snowflake_host", &self.snowflake_host)
            .field("semantic_file", &self.semantic_file)
            .field("summary_enabled", &self.summary_enabled)
            .field("summary_model", &self.summary_model)
            .field("slack_app_token", &REDACTED)
            .field("slack_bot_token", &REDACTED)
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn load(explicit_path: Option<&std::path::Path>) -> Res<Self> {
        Self::load_with_environment(explicit_path, config::Environment::default())
    }

    fn load_with_environment(explicit_path: Option<&std::path::Path>, environment: config::Environment) -> Res<Self> {
        let mut cfg = config::Config::builder();

        if let Some(p) = explicit_path {
            cfg = cfg.add_source(config::File::from(p.to_path_buf()));
        } else if std::path::Path::new(".hidden/config.toml").exists() {
            cfg = cfg.add_source(config::File::with_name(".hidden/config.toml"));
        }

        // The environment is added last, so it wins over the file.
        cfg = cfg.add_source(environment);

        let result = Config {
            inner: Arc::new(cfg.build()?.try_deserialize()?),
        };

        result.validate()?;

        Ok(result)
    }

    /// Ensure every value the bot cannot run without is present.
    pub fn validate(&self) -> Res<()> {
        let required = [
            ("SNOWFLAKE_ACCOUNT", &self.snowflake_account),
            ("SNOWFLAKE_USER", &self.snowflake_user),
            ("SNOWFLAKE_PASSWORD", &self.snowflake_password),
            ("SNOWFLAKE_WAREHOUSE", &self.snowflake_warehouse),
            ("SNOWFLAKE_DATABASE", &self.snowflake_database),
            ("SNOWFLAKE_SCHEMA", &self.snowflake_schema),
            ("SNOWFLAKE_ROLE", &self.snowflake_role),
            ("SNOWFLAKE_STAGE", &self.snowflake_stage),
            ("SNOWFLAKE_HOST", &self.snowflake_host),
            ("SEMANTIC_FILE", &self.semantic_file),
            ("SLACK_APP_TOKEN", &self.slack_app_token),
            ("SLACK_BOT_TOKEN", &self.slack_bot_token),
        ];

        let missing = required.iter().filter(|(_, value)| value.trim().is_empty()).map(|(name, _)| *name).collect::<Vec<_>>();

        if !missing.is_empty() {
            return Err(anyhow!("Missing required configuration: {}.", missing.join(", ")));
        }

        if self.summary_enabled && self.summary_model.trim().is_empty() {
            return Err(anyhow!("Summary model must be set when summaries are enabled."));
        }

        Ok(())
    }
}

impl ConfigInner {
    /// The base URL of the Snowflake account, e.g. `https://xy12345.snowflakecomputing.com`.
    pub fn snowflake_url(&self) -> String {
        format!("https://{}.{}", self.snowflake_account, self.snowflake_host)
    }

    /// The fully-qualified stage path of the semantic model, e.g. `@DB.SCHEMA.STAGE/model.yaml`.
    pub fn semantic_model_file(&self) -> String {
        format!("@{}.{}.{}/{}", self.snowflake_database, self.snowflake_schema, self.snowflake_stage, self.semantic_file)
    }
}
