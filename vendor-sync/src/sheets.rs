//! Google Sheets `values:append` as a [`ReportSink`].
//!
//! - Construct [`SheetsClient`] from the `report` section of the config; the
//!   bearer token comes from `GOOGLE_SHEET_TOKEN` (a `.env` file is honoured).
//! - Timeouts map to [`SinkError::Timeout`], 401/403 to [`SinkError::Auth`]
//!   and any other error status to [`SinkError::Rejected`]. Transport failures
//!   and unreadable responses are [`SinkError::Other`].

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};
use vendor_sync_core::contract::{AppendOutcome, ReportSink, SinkError};

use crate::load_config::ReportSection;

pub const TOKEN_ENV: &str = "GOOGLE_SHEET_TOKEN";

pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    spreadsheet_id: String,
    #[serde(default)]
    table_range: Option<String>,
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    #[serde(default)]
    updated_rows: Option<usize>,
}

impl SheetsClient {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            token: token.into(),
        })
    }

    pub fn new_from_env(report: &ReportSection) -> Result<Self> {
        dotenvy::dotenv().ok();
        let token = env::var(TOKEN_ENV)
            .with_context(|| format!("{TOKEN_ENV} must be set to publish validation reports"))?;
        info!(
            spreadsheet_id = %report.spreadsheet_id,
            base_url = %report.base_url,
            "Initialized sheets client from environment"
        );
        Self::new(
            report.base_url.clone(),
            report.spreadsheet_id.clone(),
            token,
            Duration::from_secs(report.timeout_secs),
        )
    }

    fn append_url(&self, range: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            self.base_url, self.spreadsheet_id, range
        )
    }
}

fn transport_error(e: reqwest::Error) -> SinkError {
    if e.is_timeout() {
        SinkError::Timeout(e.to_string())
    } else {
        SinkError::Other(Box::new(e))
    }
}

#[async_trait]
impl ReportSink for SheetsClient {
    async fn append(&self, range: &str, rows: Vec<Vec<String>>) -> Result<AppendOutcome, SinkError> {
        debug!(range = %range, rows = rows.len(), "Appending rows to sheet");
        let response = self
            .http
            .post(self.append_url(range))
            .bearer_auth(&self.token)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "majorDimension": "ROWS", "values": rows }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SinkError::Auth(message),
                _ => SinkError::Rejected {
                    status: status.as_u16(),
                    message,
                },
            });
        }

        let body: AppendResponse = response.json().await.map_err(transport_error)?;
        Ok(AppendOutcome {
            spreadsheet_id: body.spreadsheet_id,
            table_range: body.table_range,
            updated_rows: body
                .updates
                .and_then(|u| u.updated_rows)
                .unwrap_or_default(),
        })
    }
}
