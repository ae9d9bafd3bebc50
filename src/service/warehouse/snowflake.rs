//! Snowflake sessions over the REST protocol used by the official connectors.
//!
//! - `POST /session/v1/login-request` exchanges the user's password for a session token.
//! - `POST /queries/v1/query-request` runs a statement; results come back as JSON, inline and in chunks.
//! - `POST /session?delete=true` logs the session out.

use std::{
    collections::BTreeMap,
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Days, FixedOffset, NaiveDate, NaiveTime};
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_with::{DefaultOnNull, serde_as};
use tracing::{debug, info, instrument, warn};

use crate::base::{
    config::Config,
    types::{Res, ResultTable, Void},
};

use super::{GenericWarehouseClient, GenericWarehouseSession, WarehouseClient, WarehouseSession};

/// Codes returned while a query is still executing.
const QUERY_IN_PROGRESS_CODES: [&str; 2] = ["333333", "333334"];
/// Delay between polls of a running query.
const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound on polls of a running query (about ten minutes).
const MAX_POLLS: u32 = 1200;

// Extra methods on `WarehouseClient` applied by the snowflake implementation.

impl WarehouseClient {
    pub fn snowflake(config: &Config) -> Res<Self> {
        let client = SnowflakeWarehouseClient::new(config)?;
        Ok(Self { inner: Arc::new(client) })
    }
}

/// The `Authorization` header value for a Snowflake session token.
pub fn authorization_header(token: &str) -> String {
    format!("Snowflake Token=\"{token}\"")
}

/// The account name expected by the login request: the account identifier up to the first `.`, upper-cased.
pub fn account_name(account: &str) -> String {
    account.split('.').next().unwrap_or(account).to_uppercase()
}

// Wire types.

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    data: LoginRequestData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginRequestData<'a> {
    client_app_id: &'a str,
    client_app_version: &'a str,
    account_name: String,
    login_name: &'a str,
    password: &'a str,
    session_parameters: BTreeMap<&'a str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    bindings: BTreeMap<String, Binding<'a>>,
}

#[derive(Debug, Serialize)]
struct Binding<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Chunk {
    url: String,
    row_count: Option<usize>,
}

#[serde_as]
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    query_id: Option<String>,
    get_result_url: Option<String>,
    query_result_format: Option<String>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    rowset: Vec<Vec<Option<String>>>,
    #[serde_as(as = "DefaultOnNull")]
    #[serde(default)]
    chunks: Vec<Chunk>,
    chunk_headers: Option<BTreeMap<String, String>>,
    qrmk: Option<String>,
}

/// The envelope every Snowflake session endpoint responds with.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    success: bool,
    message: Option<String>,
    code: Option<String>,
}

/// Check the HTTP status and unwrap the envelope, failing on `success: false` unless the code is in `pass_codes`.
fn parse_envelope<T: DeserializeOwned>(status: u16, body: &str, pass_codes: &[&str]) -> Res<(Option<String>, Option<T>)> {
    if status >= 400 {
        return Err(anyhow!("Snowflake request failed with status {status}: {body}"));
    }

    let envelope = serde_json::from_str::<Envelope<T>>(body).map_err(|e| anyhow!("Failed to parse Snowflake response: {e}"))?;

    let passes = envelope.code.as_deref().is_some_and(|c| pass_codes.contains(&c));
    if !envelope.success && !passes {
        return Err(anyhow!(
            "Snowflake request failed ({}): {}",
            envelope.code.as_deref().unwrap_or("no code"),
            envelope.message.as_deref().unwrap_or("no message")
        ));
    }

    Ok((envelope.code, envelope.data))
}

/// Turn a completed query's data, with every chunk already appended, into a table.
fn into_result_table(data: QueryData) -> Res<ResultTable> {
    if let Some(format) = data.query_result_format.as_deref()
        && !format.eq_ignore_ascii_case("json")
    {
        return Err(anyhow!("Unsupported query result format: {format}."));
    }

    let rows: Vec<Vec<Option<String>>> = data
        .rowset
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, value)| value.map(|raw| render_value(data.rowtype.get(i).map_or("", |t| t.kind.as_str()), raw)))
                .collect()
        })
        .collect();

    let columns = data.rowtype.into_iter().map(|r| r.name).collect();

    Ok(ResultTable::new(columns, rows))
}

/// Render a raw JSON-encoded value as readable text, based on its column type.
///
/// Values that do not decode are kept as they came.
fn render_value(kind: &str, raw: String) -> String {
    let decoded = match kind.to_ascii_lowercase().as_str() {
        "boolean" => match raw.as_str() {
            "1" => Some("true".to_string()),
            "0" => Some("false".to_string()),
            _ => None,
        },
        "date" => render_date(&raw),
        "time" => render_time(&raw),
        "timestamp_ntz" => render_timestamp(&raw, None),
        "timestamp_ltz" => render_timestamp(&raw, FixedOffset::east_opt(0)),
        "timestamp_tz" => render_timestamp_tz(&raw),
        _ => None,
    };

    decoded.unwrap_or(raw)
}

/// Days since the epoch, e.g. `19723` is `2024-01-01`.
fn render_date(raw: &str) -> Option<String> {
    let days = raw.parse::<i64>().ok()?;
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?;

    let date = if days >= 0 {
        epoch.checked_add_days(Days::new(days.unsigned_abs()))?
    } else {
        epoch.checked_sub_days(Days::new(days.unsigned_abs()))?
    };

    Some(date.format("%Y-%m-%d").to_string())
}

/// Seconds since midnight, e.g. `45296.500` is `12:34:56.500`.
fn render_time(raw: &str) -> Option<String> {
    let (secs, nanos, digits) = parse_epoch(raw)?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(u32::try_from(secs).ok()?, nanos)?;

    Some(format!("{}{}", time.format("%H:%M:%S"), fraction(nanos, digits)))
}

/// Seconds since the epoch, rendered in UTC, with the offset appended when one is given.
fn render_timestamp(raw: &str, offset: Option<FixedOffset>) -> Option<String> {
    let (secs, nanos, digits) = parse_epoch(raw)?;
    let utc = DateTime::from_timestamp(secs, nanos)?;

    match offset {
        Some(offset) => {
            let local = utc.with_timezone(&offset);
            Some(format!("{}{} {}", local.format("%Y-%m-%d %H:%M:%S"), fraction(nanos, digits), offset))
        }
        None => Some(format!("{}{}", utc.format("%Y-%m-%d %H:%M:%S"), fraction(nanos, digits))),
    }
}

/// Seconds since the epoch followed by the offset in minutes plus 1440, e.g. `1704067200.000 1500`.
fn render_timestamp_tz(raw: &str) -> Option<String> {
    let (epoch, offset) = raw.split_once(' ')?;
    let minutes = offset.trim().parse::<i32>().ok()? - 1440;

    render_timestamp(epoch, FixedOffset::east_opt(minutes * 60))
}

/// Split `seconds.fraction` into whole seconds, nanoseconds, and the number of fraction digits.
fn parse_epoch(raw: &str) -> Option<(i64, u32, usize)> {
    let (whole, frac) = raw.trim().split_once('.').unwrap_or((raw.trim(), ""));
    if frac.len() > 9 || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs = whole.parse::<i64>().ok()?;
    let nanos = format!("{frac:0<9}").parse::<u32>().ok()?;

    // Negative values count the fraction towards the epoch.
    if whole.starts_with('-') && nanos > 0 {
        Some((secs - 1, 1_000_000_000 - nanos, frac.len()))
    } else {
        Some((secs, nanos, frac.len()))
    }
}

fn fraction(nanos: u32, digits: usize) -> String {
    if digits == 0 {
        return String::new();
    }

    let nanos = format!("{nanos:09}");
    format!(".{}", &nanos[..digits.min(9)])
}

/// Headers required to download result chunks: the ones Snowflake hands out, or the SSE-C key.
fn chunk_request_headers(data: &QueryData) -> Res<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(chunk_headers) = &data.chunk_headers {
        for (name, value) in chunk_headers {
            headers.insert(HeaderName::from_bytes(name.as_bytes())?, HeaderValue::from_str(value)?);
        }
    } else if let Some(qrmk) = &data.qrmk {
        headers.insert("x-amz-server-side-encryption-customer-algorithm", HeaderValue::from_static("AES256"));
        headers.insert("x-amz-server-side-encryption-customer-key", HeaderValue::from_str(qrmk)?);
    }

    Ok(headers)
}

/// Parse a downloaded chunk: comma-separated JSON rows without the enclosing brackets, possibly gzipped.
fn parse_chunk(bytes: &[u8]) -> Res<Vec<Vec<Option<String>>>> {
    let text = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut text = String::new();
        GzDecoder::new(bytes).read_to_string(&mut text)?;
        text
    } else {
        String::from_utf8(bytes.to_vec())?
    };

    serde_json::from_str(&format!("[{text}]")).map_err(|e| anyhow!("Failed to parse result chunk: {e}"))
}

/// Positional `TEXT` bindings, keyed `"1"`, `"2"`, ...
fn build_bindings(params: &[String]) -> BTreeMap<String, Binding<'_>> {
    params
        .iter()
        .enumerate()
        .map(|(i, value)| ((i + 1).to_string(), Binding { kind: "TEXT", value }))
        .collect()
}

// Specific implementations.

/// Snowflake warehouse client implementation.
#[derive(Clone)]
pub struct SnowflakeWarehouseClient {
    http: reqwest::Client,
    base_url: String,
    config: Config,
}

impl SnowflakeWarehouseClient {
    /// Create a new Snowflake client for the configured account.
    pub fn new(config: &Config) -> Res<Self> {
        Self::with_base_url(config, config.snowflake_url())
    }

    /// Create a new Snowflake client against an explicit base URL.
    pub fn with_base_url(config: &Config, base_url: impl Into<String>) -> Res<Self> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.into(),
            config: config.clone(),
        })
    }
}

#[async_trait]
impl GenericWarehouseClient for SnowflakeWarehouseClient {
    #[instrument(name = "SnowflakeWarehouseClient::connect", skip_all)]
    async fn connect(&self) -> Res<WarehouseSession> {
        let request = LoginRequest {
            data: LoginRequestData {
                client_app_id: env!("CARGO_PKG_NAME"),
                client_app_version: env!("CARGO_PKG_VERSION"),
                account_name: account_name(&self.config.snowflake_account),
                login_name: &self.config.snowflake_user,
                password: &self.config.snowflake_password,
                session_parameters: BTreeMap::from([("QUERY_RESULT_FORMAT", "JSON")]),
            },
        };

        let request_id = uuid::Uuid::new_v4().to_string();

        let response = self
            .http
            .post(format!("{}/session/v1/login-request", self.base_url))
            .query(&[
                ("warehouse", self.config.snowflake_warehouse.as_str()),
                ("databaseName", self.config.snowflake_database.as_str()),
                ("schemaName", self.config.snowflake_schema.as_str()),
                ("roleName", self.config.snowflake_role.as_str()),
                ("requestId", request_id.as_str()),
            ])
            .header(ACCEPT, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Failed to reach Snowflake: {e}"))?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        let (_, data) = parse_envelope::<LoginData>(status, &body, &[])?;
        let token = data.ok_or_else(|| anyhow!("Snowflake login response carried no session token."))?.token;

        info!("Opened Snowflake session for `{}`.", self.config.snowflake_user);

        Ok(WarehouseSession::new(Arc::new(SnowflakeSession {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            token,
            sequence: AtomicU64::new(0),
        })))
    }
}

/// An authenticated Snowflake session.
struct SnowflakeSession {
    http: reqwest::Client,
    base_url: String,
    token: String,
    sequence: AtomicU64,
}

impl SnowflakeSession {
    /// Poll the result URL of a running query until it completes.
    async fn wait_for_result(&self, result_url: &str) -> Res<QueryData> {
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = self
                .http
                .get(format!("{}{}", self.base_url, result_url))
                .header(ACCEPT, "application/json")
                .header(AUTHORIZATION, authorization_header(&self.token))
                .send()
                .await?;

            let status = response.status().as_u16();
            let body = response.text().await?;

            let (code, data) = parse_envelope::<QueryData>(status, &body, &QUERY_IN_PROGRESS_CODES)?;
            if code.as_deref().is_some_and(|c| QUERY_IN_PROGRESS_CODES.contains(&c)) {
                debug!("Query still running ...");
                continue;
            }

            return Ok(data.unwrap_or_default());
        }

        Err(anyhow!("Query did not complete after {MAX_POLLS} polls."))
    }

    /// Download every result chunk and append its rows to the inline rowset.
    async fn download_chunks(&self, data: &mut QueryData) -> Void {
        if data.chunks.is_empty() {
            return Ok(());
        }

        let headers = chunk_request_headers(data)?;
        let chunks = std::mem::take(&mut data.chunks);

        debug!("Downloading {} result chunks ...", chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let response = self
                .http
                .get(&chunk.url)
                .headers(headers.clone())
                .send()
                .await
                .map_err(|e| anyhow!("Failed to download result chunk {i}: {e}"))?;

            let status = response.status().as_u16();
            if status >= 400 {
                return Err(anyhow!("Result chunk {i} download failed with status {status}."));
            }

            let rows = parse_chunk(&response.bytes().await?)?;
            if let Some(expected) = chunk.row_count
                && expected != rows.len()
            {
                warn!("Result chunk {} held {} rows, expected {}.", i, rows.len(), expected);
            }

            data.rowset.extend(rows);
        }

        Ok(())
    }
}

#[async_trait]
impl GenericWarehouseSession for SnowflakeSession {
    fn token(&self) -> &str {
        &self.token
    }

    #[instrument(name = "SnowflakeSession::query", skip_all)]
    async fn query(&self, sql: &str, params: &[String]) -> Res<ResultTable> {
        let request = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            query_submission_time: chrono::Utc::now().timestamp_millis(),
            bindings: build_bindings(params),
        };

        let request_id = uuid::Uuid::new_v4().to_string();

        let response = self
            .http
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", request_id.as_str())])
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization_header(&self.token))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        let (code, data) = parse_envelope::<QueryData>(status, &body, &QUERY_IN_PROGRESS_CODES)?;
        let mut data = data.unwrap_or_default();

        if code.as_deref().is_some_and(|c| QUERY_IN_PROGRESS_CODES.contains(&c)) {
            let result_url = data.get_result_url.take().ok_or_else(|| anyhow!("Running query returned no result URL."))?;
            data = self.wait_for_result(&result_url).await?;
        }

        if let Some(query_id) = &data.query_id {
            debug!("Query `{}` completed.", query_id);
        }

        self.download_chunks(&mut data).await?;

        into_result_table(data)
    }

    #[instrument(name = "SnowflakeSession::close", skip_all)]
    async fn close(&self) -> Void {
        let response = self
            .http
            .post(format!("{}/session", self.base_url))
            .query(&[("delete", "true")])
            .header(ACCEPT, "application/json")
            .header(AUTHORIZATION, authorization_header(&self.token))
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;

        if let Err(err) = parse_envelope::<serde_json::Value>(status, &body, &[]) {
            warn!("Snowflake logout was not acknowledged: {}", err);
            return Err(err);
        }

        Ok(())
    }
}

// Tests.
