//! Relational database backend.
//!
//! One store per server; enumeration walks databases then tables, and a
//! dump pages through one table's rows. Only SQL and Windows auth variants
//! expose the server/database addressing this backend needs — connections
//! using other variants ping to an empty store list.

use async_trait::async_trait;
use reqwest::Method;
use tracing::debug;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{set_param, str_param, ConnectorClient};

pub struct SqlConnector {
    client: ApiClient,
    root: String,
}

impl SqlConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for SqlConnector {
    fn api_name(&self) -> &'static str {
        "shared_sql"
    }

    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        let auth_name = str_param(connection_parameters, "name").unwrap_or("");
        let is_windows = str_param(connection_parameters, "authType") == Some("windows");

        if !matches!(auth_name, "sqlAuthentication" | "windowsAuthentication") && !is_windows {
            // Other auth variants carry no server/database addressing.
            debug!("SQL connection auth variant exposes no server, skipping");
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

        let (server, host) = if is_windows {
            let Some(server) = str_param(connection_parameters, "server") else {
                return Ok(Vec::new());
            };
            (
                server.to_string(),
                format!("https://{server}.database.windows.net"),
            )
        } else {
            let Some(server) = set_param(connection_parameters, "server") else {
                return Ok(Vec::new());
            };
            (server.to_string(), format!("https://{server}"))
        };

        Ok(vec![DataStore::new(
            server.clone(),
            None,
            None,
            host,
            Some(server),
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let Some(server) = store.store.name.as_deref() else {
            return Ok(records);
        };

        let databases = self
            .client
            .consecutive_gets(
                &format!("{}/v2/databases", self.root),
                &[("server".to_string(), server.to_string())],
                &PageOptions::default(),
            )
            .await?;
        if !databases.success {
            return Ok(records);
        }

        for database in &databases.values {
            let Some(db_name) = database.get("Name").and_then(|n| n.as_str()) else {
                continue;
            };

            let dataset = format!("{server},{db_name}");
            let url = super::join_url(&self.root, &["v2", "datasets", &dataset, "tables"])?;
            let tables = self
                .client
                .consecutive_gets(&url, &[], &PageOptions::default())
                .await?;
            if !tables.success {
                continue;
            }

            for table in &tables.values {
                let Some(name) = table.get("Name").and_then(|n| n.as_str()) else {
                    continue;
                };
                let display_name = table
                    .get("DisplayName")
                    .and_then(|n| n.as_str())
                    .unwrap_or(name);
                records.push(DataRecord {
                    record_type: RecordType::Table,
                    record_id: name.to_string(),
                    record_name: Some(format!("{db_name}-{display_name}")),
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

        let server = record.store.store.name.as_deref().ok_or_else(fetch_error)?;
        let database = data.extra.database().ok_or_else(fetch_error)?;

        let dataset = format!("{server},{database}");
        let url = super::join_url(
            &self.root,
            &["v2", "datasets", &dataset, "tables", &data.record_id, "items"],
        )?;
        let rows = self
            .client
            .consecutive_gets(&url, &[], &PageOptions::default())
            .await?;
        if !rows.success {
            return Err(fetch_error());
        }

        let content = serde_json::to_vec(&rows.values).map_err(|e| {
            ConnSurveyorError::serialization(format!("table {}", data.record_id), e)
        })?;
        Ok(DataDump::text("json", content))
    }
}
