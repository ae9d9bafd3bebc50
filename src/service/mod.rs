//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services used by the analyst-bot:
//! - Chat services (e.g., Slack)
//! - Text-to-SQL services (e.g., Cortex Analyst)
//! - Warehouse sessions (e.g., Snowflake)
//! - Result summaries
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod analyst;
pub mod chat;
pub mod summarizer;
pub mod warehouse;
