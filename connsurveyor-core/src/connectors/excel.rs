//! Spreadsheet backend.
//!
//! `ping` enumerates sources and their drives (one store per drive);
//! `enum` walks each drive's folder tree with an explicit work stack and
//! lists the workbook tables of every file it finds; a dump pages through
//! one table's rows.

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{str_param, ConnectorClient};

pub struct ExcelOnlineBusinessConnector {
    client: ApiClient,
    root: String,
}

impl ExcelOnlineBusinessConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }

    fn source_query(source_id: &str) -> Vec<(String, String)> {
        vec![("source".to_string(), source_id.to_string())]
    }

    /// Lists one folder's children. `folder_id` of `None` addresses the
    /// drive root.
    async fn list_children(
        &self,
        source_id: &str,
        drive_id: &str,
        folder_id: Option<&str>,
    ) -> Result<Option<Vec<serde_json::Value>>> {
        let mut segments = vec!["codeless", "v1.0", "drives", drive_id];
        match folder_id {
            Some(id) => {
                segments.push("items");
                segments.push(id);
            }
            None => segments.push("root"),
        }
        segments.push("children");

        let response = self
            .client
            .request_and_verify(
                Method::GET,
                &super::join_url(&self.root, &segments)?,
                &Self::source_query(source_id),
                "200",
                true,
            )
            .await?;
        if !response.success {
            return Ok(None);
        }

        let entries = response
            .body
            .json()
            .and_then(|v| v.as_array())
            .cloned()
            .ok_or_else(|| {
                ConnSurveyorError::invalid_response(format!(
                    "Folder listing for drive {drive_id} is not an array"
                ))
            })?;
        Ok(Some(entries))
    }
}

#[async_trait]
impl ConnectorClient for ExcelOnlineBusinessConnector {
    fn api_name(&self) -> &'static str {
        "shared_excelonlinebusiness"
    }

    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        let mut stores = Vec::new();

        let sources = self
            .client
            .consecutive_gets(
                &format!("{}/codeless/v1.0/sources", self.root),
                &[],
                &PageOptions::default(),
            )
            .await?;
        if !sources.success {
            return Ok(stores);
        }

        let Some(account) = str_param(connection_parameters, "accountName") else {
            return Ok(stores);
        };

        for source in &sources.values {
            let Some(source_id) = source.get("id").and_then(|v| v.as_str()) else {
                continue;
            };

            let drives = self
                .client
                .consecutive_gets(
                    &format!("{}/codeless/v1.0/drives", self.root),
                    &Self::source_query(source_id),
                    &PageOptions::default(),
                )
                .await?;
            if !drives.success {
                continue;
            }

            for drive in &drives.values {
                let Some(drive_id) = drive.get("id").and_then(|v| v.as_str()) else {
                    continue;
                };
                stores.push(DataStore::new(
                    account,
                    None,
                    None,
                    drive
                        .get("webUrl")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default(),
                    drive.get("name").and_then(|v| v.as_str()).map(str::to_string),
                    StoreExtra::Drive {
                        source_id: source_id.to_string(),
                        drive_id: drive_id.to_string(),
                    },
                ));
            }
        }

        Ok(stores)
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let Some((source_id, drive_id)) = store.store.extra.as_drive() else {
            return Ok(records);
        };

        // Depth-first file discovery over an explicit work stack; None is
        // the drive root.
        let mut files: Vec<serde_json::Value> = Vec::new();
        let mut stack: Vec<Option<String>> = vec![None];
        while let Some(folder) = stack.pop() {
            let Some(entries) = self
                .list_children(source_id, drive_id, folder.as_deref())
                .await?
            else {
                continue;
            };
            for entry in entries {
                let is_folder = entry
                    .get("IsFolder")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if is_folder {
                    if let Some(id) = entry.get("Id").and_then(|v| v.as_str()) {
                        stack.push(Some(id.to_string()));
                    }
                } else {
                    files.push(entry);
                }
            }
        }

        for file in &files {
            let Some(file_id) = file.get("Id").and_then(|v| v.as_str()) else {
                continue;
            };
            let file_path = file.get("Path").and_then(|v| v.as_str()).unwrap_or_default();

            let tables = self
                .client
                .consecutive_gets(
                    &super::join_url(
                        &self.root,
                        &[
                            "codeless", "v1.0", "drives", drive_id, "items", file_id, "workbook",
                            "tables",
                        ],
                    )?,
                    &Self::source_query(source_id),
                    &PageOptions::default(),
                )
                .await?;
            if !tables.success {
                continue;
            }

            for table in &tables.values {
                let Some(table_id) = table.get("id").and_then(|v| v.as_str()) else {
                    continue;
                };
                let table_name = table.get("name").and_then(|v| v.as_str()).unwrap_or(table_id);
                records.push(DataRecord {
                    record_type: RecordType::Table,
                    record_id: table_id.to_string(),
                    record_name: Some(format!("{file_path}/{table_name}")),
                    extra: RecordExtra::WorkbookTable {
                        file_id: file_id.to_string(),
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

        let (source_id, drive_id) = record.store.store.extra.as_drive().ok_or_else(fetch_error)?;
        let RecordExtra::WorkbookTable { file_id } = &data.extra else {
            return Err(fetch_error());
        };

        let rows = self
            .client
            .consecutive_gets(
                &super::join_url(
                    &self.root,
                    &[
                        "drives",
                        drive_id,
                        "files",
                        file_id,
                        "tables",
                        &data.record_id,
                        "items",
                    ],
                )?,
                &Self::source_query(source_id),
                &PageOptions::default(),
            )
            .await?;
        if !rows.success {
            return Err(fetch_error());
        }

        let content = serde_json::to_vec(&rows.values).map_err(|e| {
            ConnSurveyorError::serialization(format!("workbook table {}", data.record_id), e)
        })?;
        Ok(DataDump::text("json", content))
    }
}
