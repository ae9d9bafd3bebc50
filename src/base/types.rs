use std::fmt;

use serde::{Deserialize, Serialize};

pub type Err = anyhow::Error;
pub type Res<T> = Result<T, Err>;
pub type Void = Res<()>;

// Mentions.

/// A user mentioned the bot.
///
/// Created from the chat platform's event and consumed once by the mention handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    /// The user who mentioned the bot.
    pub user: String,
    /// The channel the mention was posted in.
    pub channel: String,
    /// The raw message text, including the mention itself (e.g., `<@U123> show me sales`).
    pub text: String,
    /// The timestamp of the message.
    pub ts: String,
    /// The timestamp of the parent thread, if the mention was posted in a thread.
    pub thread_ts: Option<String>,
}

impl MentionEvent {
    /// The question asked, with the leading bot mention stripped.
    ///
    /// Everything up to and including the first `>` is dropped and the rest is trimmed.
    /// If there is no `>`, the full text is returned unchanged.
    pub fn question(&self) -> &str {
        match self.text.split_once('>') {
            Some((_, rest)) => rest.trim(),
            None => &self.text,
        }
    }

    /// The thread to reply into: the parent thread if there is one, otherwise the message itself.
    pub fn reply_thread_ts(&self) -> &str {
        self.thread_ts.as_deref().unwrap_or(&self.ts)
    }
}

// Analyst.

/// The body returned by the analyst endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystResponse {
    pub message: AnalystMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalystMessage {
    pub content: Vec<AnalystContent>,
}

/// A single content item of an analyst message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AnalystContent {
    Text { text: String },
    Sql { statement: String },
    #[serde(other)]
    Other,
}

/// The parts of an analyst response the bot acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalystAnswer {
    /// Text segments, in response order.
    pub text: Vec<String>,
    /// The SQL statement to run, if any.
    ///
    /// When the response carries several statements, the last one wins.
    pub sql: Option<String>,
}

impl From<AnalystResponse> for AnalystAnswer {
    fn from(response: AnalystResponse) -> Self {
        let mut answer = AnalystAnswer::default();

        for item in response.message.content {
            match item {
                AnalystContent::Text { text } => answer.text.push(text),
                AnalystContent::Sql { statement } => answer.sql = Some(statement),
                AnalystContent::Other => {}
            }
        }

        answer
    }
}

impl AnalystAnswer {
    /// The text segments joined by newlines.
    pub fn narrative(&self) -> String {
        self.text.join("\n")
    }

    /// The SQL statement, if present and not blank.
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref().filter(|s| !s.is_empty())
    }
}

// Warehouse.

/// A fully materialized query result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// The first cell of the first row, if it exists and is not null.
    pub fn first_value(&self) -> Option<&str> {
        self.rows.first().and_then(|row| row.first()).and_then(|cell| cell.as_deref())
    }
}

/// Renders the table as right-aligned plain-text columns with a header row and no index.
impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NULL: &str = "NULL";

        let cell = |row: &[Option<String>], i: usize| -> String { row.get(i).and_then(|c| c.clone()).unwrap_or_else(|| NULL.to_string()) };

        let widths = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, name)| self.rows.iter().map(|row| cell(row, i).chars().count()).fold(name.chars().count(), usize::max))
            .collect::<Vec<_>>();

        let header = self.columns.iter().zip(&widths).map(|(name, &w)| format!("{name:>w$}")).collect::<Vec<_>>().join(" ");
        write!(f, "{header}")?;

        for row in &self.rows {
            let line = widths.iter().enumerate().map(|(i, &w)| format!("{:>w$}", cell(row, i))).collect::<Vec<_>>().join(" ");
            write!(f, "\n{line}")?;
        }

        Ok(())
    }
}

// Tests.
