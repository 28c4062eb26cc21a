//! Blob storage backend.
//!
//! `ping` yields one store per root folder of the storage account; `enum`
//! walks each root folder's subtree with an explicit work stack, so memory
//! stays bounded on deep trees and the walk can be cut between iterations.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{set_param, str_param, ConnectorClient};

/// Placeholder account used when the connection was created against a blob
/// endpoint URL instead of a storage-account name; the proxied API resolves
/// it from the connection's own settings.
pub(crate) const ACCOUNT_FROM_SETTINGS: &str = "AccountNameFromSettings";

pub struct AzureBlobConnector {
    client: ApiClient,
    root: String,
}

impl AzureBlobConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }

    fn folder_options() -> PageOptions {
        PageOptions::new().with_page_token_field("nextLink")
    }

    async fn list_folder(
        &self,
        storage_account: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<Vec<serde_json::Value>>> {
        let mut segments = vec!["v2", "datasets", storage_account, "foldersV2"];
        if let Some(id) = folder_id {
            segments.push(id);
        }
        let url = super::join_url(&self.root, &segments)?;
        let listing = self
            .client
            .consecutive_gets(&url, &[], &Self::folder_options())
            .await?;
        Ok(listing.success.then_some(listing.values))
    }
}

#[async_trait]
impl ConnectorClient for AzureBlobConnector {
    fn api_name(&self) -> &'static str {
        "shared_azureblob"
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
            set_param(connection_parameters, "accountName").map(str::to_string)
        else {
            return Ok(Vec::new());
        };
        if storage_account.starts_with("https://") {
            storage_account = ACCOUNT_FROM_SETTINGS.to_string();
        }

        let mut stores = Vec::new();
        if let Some(root_folders) = self.list_folder(&storage_account, None).await? {
            for folder in root_folders {
                let (Some(name), Some(display_name), Some(id)) = (
                    folder.get("Name").and_then(|v| v.as_str()),
                    folder.get("DisplayName").and_then(|v| v.as_str()),
                    folder.get("Id").and_then(|v| v.as_str()),
                ) else {
                    continue;
                };
                stores.push(DataStore::new(
                    storage_account.clone(),
                    None,
                    None,
                    format!("https://{storage_account}.blob.core.windows.net/{name}"),
                    Some(display_name.to_string()),
                    StoreExtra::Blob {
                        storage_account: storage_account.clone(),
                        folder_id: id.to_string(),
                    },
                ));
            }
        }

        Ok(stores)
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let Some((storage_account, root_folder_id)) = store.store.extra.as_blob() else {
            return Ok(records);
        };

        // Depth-first over an explicit work stack.
        let mut stack: Vec<String> = vec![root_folder_id.to_string()];
        while let Some(folder_id) = stack.pop() {
            let Some(entries) = self.list_folder(storage_account, Some(&folder_id)).await? else {
                continue;
            };

            for entry in entries {
                let is_folder = entry
                    .get("IsFolder")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let Some(id) = entry.get("Id").and_then(|v| v.as_str()) else {
                    continue;
                };

                if is_folder {
                    stack.push(id.to_string());
                    continue;
                }

                records.push(DataRecord {
                    record_type: RecordType::File,
                    record_id: id.to_string(),
                    record_name: entry
                        .get("Name")
                        .and_then(|v| v.as_str())
                        .map(str::to_string),
                    extra: RecordExtra::File {
                        path: entry
                            .get("Path")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        media_type: entry
                            .get("MediaType")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
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

        let (storage_account, _) = record.store.store.extra.as_blob().ok_or_else(fetch_error)?;

        let url = super::join_url(
            &self.root,
            &[
                "v2",
                "datasets",
                storage_account,
                "files",
                &data.record_id,
                "content",
            ],
        )?;
        let response = self
            .client
            .request_and_verify(Method::GET, &url, &[], "200", false)
            .await?;
        if !response.success {
            return Err(fetch_error());
        }
        let content = response.body.text().unwrap_or_default().as_bytes().to_vec();

        let extension = data
            .record_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .map_or("txt", |(_, ext)| ext)
            .to_string();

        Ok(DataDump::text(extension, content))
    }
}
