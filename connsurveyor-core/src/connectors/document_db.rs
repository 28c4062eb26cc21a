//! Document store backend.
//!
//! Databases and their collections come back under backend-specific
//! envelope fields (`Databases`, `DocumentCollections`, `Documents`)
//! instead of the platform-wide `value` field, so every listing overrides
//! the pagination data field.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{set_param, str_param, ConnectorClient};

pub struct DocumentDbConnector {
    client: ApiClient,
    root: String,
}

impl DocumentDbConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for DocumentDbConnector {
    fn api_name(&self) -> &'static str {
        "shared_documentdb"
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

        let Some(account) = set_param(connection_parameters, "databaseAccount") else {
            return Ok(Vec::new());
        };

        Ok(vec![DataStore::new(
            account,
            None,
            None,
            format!("https://{account}.table.cosmos.azure.com:443/"),
            Some(account.to_string()),
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let Some(account) = store.store.name.as_deref() else {
            return Ok(records);
        };

        let databases = self
            .client
            .consecutive_gets(
                &super::join_url(&self.root, &["v2", "cosmosdb", account, "dbs"])?,
                &[],
                &PageOptions::new().with_data_field("Databases"),
            )
            .await?;
        if !databases.success {
            return Ok(records);
        }

        for database in &databases.values {
            let Some(db_name) = database.get("id").and_then(|n| n.as_str()) else {
                continue;
            };

            let collections = self
                .client
                .consecutive_gets(
                    &super::join_url(
                        &self.root,
                        &["v2", "cosmosdb", account, "dbs", db_name, "colls"],
                    )?,
                    &[],
                    &PageOptions::new().with_data_field("DocumentCollections"),
                )
                .await?;
            if !collections.success {
                continue;
            }

            for collection in &collections.values {
                let Some(id) = collection.get("id").and_then(|n| n.as_str()) else {
                    continue;
                };
                records.push(DataRecord {
                    record_type: RecordType::Collection,
                    record_id: id.to_string(),
                    record_name: Some(format!("{db_name}-{id}")),
                    extra: RecordExtra::Database {
                        database: db_name.to_string(),
                    },
                });
            }
        }

        Ok(records)
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        let fetch_error =
            || ConnSurveyorError::record_fetch(self.api_name(), data.record_type, &data.record_id);

        let account = record.store.store.name.as_deref().ok_or_else(fetch_error)?;
        let database = data.extra.database().ok_or_else(fetch_error)?;

        let documents = self
            .client
            .consecutive_gets(
                &super::join_url(
                    &self.root,
                    &[
                        "v2",
                        "cosmosdb",
                        account,
                        "dbs",
                        database,
                        "colls",
                        &data.record_id,
                        "docs",
                    ],
                )?,
                &[],
                &PageOptions::new().with_data_field("Documents"),
            )
            .await?;
        if !documents.success {
            return Err(fetch_error());
        }

        let content = serde_json::to_vec(&documents.values).map_err(|e| {
            ConnSurveyorError::serialization(format!("collection {}", data.record_id), e)
        })?;
        Ok(DataDump::text("json", content))
    }
}
