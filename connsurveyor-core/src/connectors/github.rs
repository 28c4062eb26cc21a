//! Source control backend.
//!
//! Ping-only: probing a trigger endpoint proves the connection works and
//! the OAuth client id and granted scopes come back in undocumented
//! response headers. Nothing is enumerable through the proxied API, so
//! `enum` yields no records rather than failing the run.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, StoreExtra,
};
use crate::transport::ApiClient;

use super::ConnectorClient;

pub struct GitHubConnector {
    client: ApiClient,
    root: String,
}

impl GitHubConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for GitHubConnector {
    fn api_name(&self) -> &'static str {
        "shared_github"
    }

    async fn ping(&self, _connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        // 200 is documented but 202 has been observed; accept the 20x range.
        let response = self
            .client
            .request_and_verify(
                Method::GET,
                &format!("{}/trigger/issueClosed", self.root),
                &[],
                "20",
                true,
            )
            .await?;
        if !response.success {
            return Ok(Vec::new());
        }

        let Some(client_id) = response.header("x-oauth-client-id") else {
            return Ok(Vec::new());
        };

        Ok(vec![DataStore::new(
            client_id,
            None,
            response.header("x-oauth-scopes").map(str::to_string),
            "https://api.github.com/",
            None,
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, _store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        Ok(Vec::new())
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        Err(ConnSurveyorError::record_fetch(
            self.api_name(),
            data.record_type,
            &data.record_id,
        ))
    }
}
