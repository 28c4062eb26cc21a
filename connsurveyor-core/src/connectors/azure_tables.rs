//! Table storage backend. One store per storage account; one record per
//! table; a dump pages through the table's entities.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{set_param, str_param, ConnectorClient};

pub struct AzureTablesConnector {
    client: ApiClient,
    root: String,
}

impl AzureTablesConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for AzureTablesConnector {
    fn api_name(&self) -> &'static str {
        "shared_azuretables"
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

        Ok(vec![DataStore::new(
            storage_account.clone(),
            None,
            None,
            format!("https://{storage_account}.table.core.windows.net"),
            Some(storage_account),
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let Some(storage_account) = store.store.name.as_deref() else {
            return Ok(records);
        };

        let tables = self
            .client
            .consecutive_gets(
                &super::join_url(
                    &self.root,
                    &["v2", "storageAccounts", storage_account, "tables"],
                )?,
                &[],
                &PageOptions::default(),
            )
            .await?;
        if !tables.success {
            return Ok(records);
        }

        for table in &tables.values {
            let Some(name) = table.get("TableName").and_then(|n| n.as_str()) else {
                continue;
            };
            records.push(DataRecord {
                record_type: RecordType::Table,
                record_id: name.to_string(),
                record_name: Some(name.to_string()),
                extra: RecordExtra::None,
            });
        }

        Ok(records)
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        let fetch_error =
            || ConnSurveyorError::record_fetch(self.api_name(), data.record_type, &data.record_id);

        let storage_account = record.store.store.name.as_deref().ok_or_else(fetch_error)?;

        let entities = self
            .client
            .consecutive_gets(
                &super::join_url(
                    &self.root,
                    &[
                        "v2",
                        "storageAccounts",
                        storage_account,
                        "tables",
                        &data.record_id,
                        "entities",
                    ],
                )?,
                &[],
                &PageOptions::default(),
            )
            .await?;
        if !entities.success {
            return Err(fetch_error());
        }

        let content = serde_json::to_vec(&entities.values).map_err(|e| {
            ConnSurveyorError::serialization(format!("table {}", data.record_id), e)
        })?;
        Ok(DataDump::text("json", content))
    }
}
