//! Queue storage backend.
//!
//! One store per queue; each queue collapses to a single `queue_message`
//! record whose dump peeks the first ten messages without consuming them.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::ApiClient;

use super::{set_param, str_param, ConnectorClient};

pub struct AzureQueuesConnector {
    client: ApiClient,
    root: String,
}

impl AzureQueuesConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for AzureQueuesConnector {
    fn api_name(&self) -> &'static str {
        "shared_azurequeues"
    }

    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        if str_param(connection_parameters, "name") != Some("keyBasedAuth") {
            return Ok(Vec::new());
        }

        let reachable = self
            .client
            .request_and_verify(
                Method::GET,
                &format!("{}/testconnection", self.root),
                &[],
                "200",
                true,
            )
            .await?
            .success;
        if !reachable {
            return Ok(Vec::new());
        }

        let Some(mut storage_account) =
            set_param(connection_parameters, "storageaccount").map(str::to_string)
        else {
            return Ok(Vec::new());
        };
        if storage_account.starts_with("https://") {
            storage_account = super::azure_blob::ACCOUNT_FROM_SETTINGS.to_string();
        }

        let listing = self
            .client
            .request_and_verify(
                Method::GET,
                &super::join_url(
                    &self.root,
                    &["v2", "storageAccounts", &storage_account, "queues", "list"],
                )?,
                &[],
                "200",
                true,
            )
            .await?;
        if !listing.success {
            return Ok(Vec::new());
        }

        let mut stores = Vec::new();
        let queues = listing
            .body
            .json()
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        for queue in queues {
            let Some(name) = queue.get("Name").and_then(|n| n.as_str()) else {
                continue;
            };
            stores.push(DataStore::new(
                storage_account.clone(),
                None,
                None,
                format!("https://{storage_account}.queue.core.windows.net/{name}"),
                Some(name.to_string()),
                StoreExtra::None,
            ));
        }

        Ok(stores)
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let Some(queue_name) = store.store.name.as_deref() else {
            return Ok(Vec::new());
        };
        Ok(vec![DataRecord {
            record_type: RecordType::QueueMessage,
            record_id: queue_name.to_string(),
            record_name: Some(queue_name.to_string()),
            extra: RecordExtra::None,
        }])
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        let fetch_error =
            || ConnSurveyorError::record_fetch(self.api_name(), data.record_type, &data.record_id);

        let url = super::join_url(
            &self.root,
            &[
                "v2",
                "storageAccounts",
                &record.store.store.account,
                "queues",
                &data.record_id,
                "messages",
            ],
        )?;
        let response = self
            .client
            .request_and_verify(
                Method::GET,
                &url,
                &[("numofmessages".to_string(), "10".to_string())],
                "200",
                true,
            )
            .await?;
        if !response.success {
            return Err(fetch_error());
        }

        let messages = response
            .body
            .json()
            .and_then(|v| v.get("QueueMessagesList"))
            .and_then(|v| v.get("QueueMessage"))
            .cloned()
            .ok_or_else(fetch_error)?;

        let content = serde_json::to_vec(&messages).map_err(|e| {
            ConnSurveyorError::serialization(format!("queue {}", data.record_id), e)
        })?;
        Ok(DataDump::text("json", content))
    }
}
