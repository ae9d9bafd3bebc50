//! Event handling and user interactions for analyst-bot.
//!
//! This module provides functionality for handling chat events:
//! - Processing @-mentions
//! - Coordinating responses between services (analyst, warehouse, chat)

pub mod mention;
