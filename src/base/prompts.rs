//! Prompt templates for the summary model.

/// Default instructions given to the summary model.
pub const SUMMARY_DIRECTIVE: &str = r#####"
You have been answering questions in a slack thread as a slackbot.  Your purpose as a slackbot is to retrieve data from our snowflake data warehouse.

You've already retrieved data from the warehouse based on the user's question.  The user has asked you to provide a summary of the data you've retrieved.

Based on the generated content between the tags below, provide a summary of the data you've retrieved.  The summary should be concise, and should make it easy for the user to understand the key insights from the data.  Don't include anything else except for the summary text in your response (no headers).
"#####;

/// Build the full summary prompt from the directive and the already-produced content.
pub fn build_summary_prompt(directive: &str, question: &str, sql: &str, data: &str) -> String {
    format!("{directive}\n<prompt>\n{question}\n</prompt>\n\n<sql_query>\n{sql}\n</sql_query>\n\n<data_results>\n{data}\n</data_results>\n")
}
