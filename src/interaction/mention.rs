//! This module handles bot mentions: ask the analyst, run its SQL, summarize, reply.

use tracing::{Instrument, error, info, instrument};

use crate::{
    base::types::{AnalystAnswer, MentionEvent, Res, Void},
    service::{
        analyst::AnalystClient,
        chat::ChatClient,
        summarizer::Summarizer,
        warehouse::{WarehouseClient, WarehouseSession},
    },
};

/// The reply sent in place of an answer whenever anything goes wrong.
pub const APOLOGY_MESSAGE: &str = "Sorry, I encountered an error. Please try again later.";

/// Handles a mention event.
///
/// Spawns a new task to process the event asynchronously.
#[instrument(skip_all)]
pub fn handle_mention(event: MentionEvent, warehouse: WarehouseClient, analyst: AnalystClient, summarizer: Option<Summarizer>, chat: ChatClient) {
    tokio::spawn(async move {
        // Process the event.
        let result = process_mention(event, &warehouse, &analyst, summarizer.as_ref(), &chat).in_current_span().await;

        // Log any errors.
        if let Err(err) = &result {
            error!("Error while handling: {}", err);
        }
    });
}

/// Answers a mention in its thread.
///
/// Every failure while producing the answer is logged and replaced by [`APOLOGY_MESSAGE`]; an
/// error is returned only if the apology itself cannot be delivered.
#[instrument(skip_all, fields(user = %event.user, channel = %event.channel))]
pub async fn process_mention(event: MentionEvent, warehouse: &WarehouseClient, analyst: &AnalystClient, summarizer: Option<&Summarizer>, chat: &ChatClient) -> Void {
    info!("Received mention from user {}", event.user);

    let thread_ts = event.reply_thread_ts();

    match answer_mention(&event, warehouse, analyst, summarizer).await {
        Ok(reply) => match chat.send_message(&event.channel, thread_ts, &reply).await {
            Ok(()) => {
                info!("Response sent successfully");
                return Ok(());
            }
            Err(err) => error!("Error sending response: {:?}", err),
        },
        Err(err) => error!("Error processing mention: {:?}", err),
    }

    chat.send_message(&event.channel, thread_ts, APOLOGY_MESSAGE).await
}

/// Runs the flow on a fresh warehouse session, which is released whatever the outcome.
async fn answer_mention(event: &MentionEvent, warehouse: &WarehouseClient, analyst: &AnalystClient, summarizer: Option<&Summarizer>) -> Res<String> {
    let session = warehouse.connect().await?;

    let result = answer_question(&session, event.question(), analyst, summarizer).await;

    session.close().await;

    result
}

async fn answer_question(session: &WarehouseSession, question: &str, analyst: &AnalystClient, summarizer: Option<&Summarizer>) -> Res<String> {
    // Ask the analyst.

    let response = analyst.send_message(question, session.token()?).await?;
    let answer = AnalystAnswer::from(response);

    // Run the SQL, if any, and summarize non-empty results.

    let mut summary = None;

    if let Some(sql) = answer.sql() {
        let table = session.query(sql).await?;

        info!("Query returned {} rows.", table.len());

        if !table.is_empty()
            && let Some(summarizer) = summarizer
        {
            let data = Summarizer::data_for_summary(&table);
            summary = Some(summarizer.summarize(session, question, sql, &data).await);
        }
    }

    Ok(format_reply(&answer, summary.as_deref()))
}

/// Formats the reply: the narrative, then the fenced SQL, then the summary if one was generated.
pub fn format_reply(answer: &AnalystAnswer, summary: Option<&str>) -> String {
    let mut reply = answer.narrative();

    if let Some(sql) = answer.sql() {
        reply.push_str(&format!("\n\nSQL Query:\n```sql\n{sql}\n```"));

        if let Some(summary) = summary {
            reply.push_str(&format!("\n\nSummary:\n{summary}"));
        }
    }

    reply
}

// Tests.

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &[&str], sql: Option<&str>) -> AnalystAnswer {
        AnalystAnswer {
            text: text.iter().map(|t| t.to_string()).collect(),
            sql: sql.map(str::to_string),
        }
    }

    #[test]
    fn test_format_reply_text_only() {
        assert_eq!(format_reply(&answer(&["a", "b"], None), None), "a\nb");
    }

    #[test]
    fn test_format_reply_with_sql() {
        assert_eq!(format_reply(&answer(&["a"], Some("SELECT 1")), None), "a\n\nSQL Query:\n```sql\nSELECT 1\n```");
    }

    #[test]
    fn test_format_reply_with_summary() {
        assert_eq!(
            format_reply(&answer(&["a"], Some("SELECT 1")), Some("One row.")),
            "a\n\nSQL Query:\n```sql\nSELECT 1\n```\n\nSummary:\nOne row."
        );
    }

    #[test]
    fn test_format_reply_keeps_empty_summary_header() {
        assert!(format_reply(&answer(&["a"], Some("SELECT 1")), Some("")).ends_with("\n\nSummary:\n"));
    }

    #[test]
    fn test_format_reply_ignores_summary_without_sql() {
        assert_eq!(format_reply(&answer(&["a"], None), Some("ignored")), "a");
    }
}
