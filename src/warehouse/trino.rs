//! Trino HTTP statement protocol
//!
//! A query is POSTed to `/v1/statement`; the server answers with a page that may carry `data`
//! rows and a `nextUri` to poll until the statement finishes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};

use super::{Row, Warehouse, WarehouseError};
use crate::config::WarehouseConfig;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementPage {
    id: Option<String>,
    next_uri: Option<String>,
    data: Option<Vec<Row>>,
    error: Option<StatementFailure>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementFailure {
    message: String,
    error_name: Option<String>,
}

pub struct TrinoWarehouse {
    client: Client,
    config: WarehouseConfig,
}

impl TrinoWarehouse {
    pub fn new(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| WarehouseError::Query(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    fn statement_url(&self) -> String {
        format!("{}/v1/statement", self.config.url.trim_end_matches('/'))
    }

    async fn read_page(response: reqwest::Response) -> Result<StatementPage, WarehouseError> {
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(WarehouseError::TransientUpstream(format!(
                "warehouse returned HTTP {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WarehouseError::Query(format!("HTTP {status}: {body}")));
        }
        response
            .json::<StatementPage>()
            .await
            .map_err(|e| WarehouseError::Decode(e.to_string()))
    }
}

fn transport(err: reqwest::Error) -> WarehouseError {
    WarehouseError::TransientUpstream(err.to_string())
}

#[async_trait]
impl Warehouse for TrinoWarehouse {
    async fn exec_query(&self, query: &str) -> Result<Vec<Row>, WarehouseError> {
        trace!("Executing warehouse query: {}", query.trim());
        let response = self
            .client
            .post(self.statement_url())
            .header("X-Trino-User", &self.config.user)
            .header("X-Trino-Catalog", &self.config.catalog)
            .header("X-Trino-Schema", &self.config.schema)
            .body(query.to_string())
            .send()
            .await
            .map_err(transport)?;

        let mut page = Self::read_page(response).await?;
        let mut rows = Vec::new();
        loop {
            if let Some(failure) = page.error {
                return Err(WarehouseError::Query(match failure.error_name {
                    Some(name) => format!("{name}: {}", failure.message),
                    None => failure.message,
                }));
            }
            if let Some(data) = page.data {
                rows.extend(data);
            }
            let Some(next_uri) = page.next_uri else {
                break;
            };
            let response = self
                .client
                .get(&next_uri)
                .header("X-Trino-User", &self.config.user)
                .send()
                .await
                .map_err(transport)?;
            page = Self::read_page(response).await?;
        }

        debug!(
            "Warehouse statement {} returned {} rows",
            page.id.as_deref().unwrap_or("unknown"),
            rows.len()
        );
        if rows.is_empty() {
            return Err(WarehouseError::NotFound);
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_page_decoding() {
        let page: StatementPage = serde_json::from_str(
            r#"{
                "id": "20260101_000000_00001_abcde",
                "nextUri": "http://trino:8080/v1/statement/executing/1",
                "columns": [{"name": "device_ip", "type": "varchar"}],
                "data": [["10.10.1.1", "core-sw-01"]],
                "stats": {"state": "RUNNING"}
            }"#,
        )
        .expect("Failed to decode page");

        assert!(page.next_uri.is_some());
        assert_eq!(page.data.expect("rows missing")[0][1], "core-sw-01");
    }

    #[test]
    fn test_statement_failure_decoding() {
        let page: StatementPage = serde_json::from_str(
            r#"{"id": "q1", "error": {"message": "Table not found", "errorName": "TABLE_NOT_FOUND"}}"#,
        )
        .expect("Failed to decode page");
        let failure = page.error.expect("error missing");
        assert_eq!(failure.error_name.as_deref(), Some("TABLE_NOT_FOUND"));
    }

    #[test]
    fn test_statement_url_strips_trailing_slash() {
        let warehouse = TrinoWarehouse::new(WarehouseConfig {
            url: "http://trino:8080/".to_string(),
            ..Default::default()
        })
        .expect("Failed to build warehouse");
        assert_eq!(warehouse.statement_url(), "http://trino:8080/v1/statement");
    }
}
