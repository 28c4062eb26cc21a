//! Key/secret store backend.
//!
//! One connection addresses one vault. Keys and secrets are enumerated
//! through paged listings; only secret values are dumpable — key material
//! is not exportable through the proxied API, so dumping a key record
//! yields a record-scoped fetch error the data collector logs and skips.

use async_trait::async_trait;
use reqwest::Method;
use tracing::warn;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::{ApiClient, PageOptions};

use super::{str_param, ConnectorClient};

pub struct KeyVaultConnector {
    client: ApiClient,
    root: String,
}

impl KeyVaultConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

#[async_trait]
impl ConnectorClient for KeyVaultConnector {
    fn api_name(&self) -> &'static str {
        "shared_keyvault"
    }

    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        let can_list_keys = self
            .client
            .request_and_verify(Method::GET, &format!("{}/keys", self.root), &[], "200", true)
            .await?
            .success;
        let can_list_secrets = self
            .client
            .request_and_verify(
                Method::GET,
                &format!("{}/secrets", self.root),
                &[],
                "200",
                true,
            )
            .await?
            .success;

        if !can_list_keys && !can_list_secrets {
            return Ok(Vec::new());
        }

        let Some(account) = str_param(connection_parameters, "accountName")
            .or_else(|| str_param(connection_parameters, "token:clientId"))
        else {
            warn!("Key vault connection carries an unrecognized auth shape, skipping");
            return Ok(Vec::new());
        };

        let Some(vault_name) = str_param(connection_parameters, "vaultName") else {
            warn!("Key vault connection declares no vault name, skipping");
            return Ok(Vec::new());
        };
        let vault_name = vault_name.trim();

        Ok(vec![DataStore::new(
            account,
            str_param(connection_parameters, "token:TenantId").map(str::to_string),
            None,
            format!("https://{vault_name}.vault.azure.net/"),
            Some(vault_name.to_string()),
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, _store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();

        let keys = self
            .client
            .consecutive_gets(&format!("{}/keys", self.root), &[], &PageOptions::default())
            .await?;
        if keys.success {
            for key in &keys.values {
                if let Some(name) = key.get("name").and_then(|n| n.as_str()) {
                    records.push(DataRecord {
                        record_type: RecordType::Key,
                        record_id: name.to_string(),
                        record_name: Some(name.to_string()),
                        extra: RecordExtra::None,
                    });
                }
            }
        }

        let secrets = self
            .client
            .consecutive_gets(
                &format!("{}/secrets", self.root),
                &[],
                &PageOptions::default(),
            )
            .await?;
        if secrets.success {
            for secret in &secrets.values {
                if let Some(name) = secret.get("name").and_then(|n| n.as_str()) {
                    records.push(DataRecord {
                        record_type: RecordType::Secret,
                        record_id: name.to_string(),
                        record_name: Some(name.to_string()),
                        extra: RecordExtra::None,
                    });
                }
            }
        }

        Ok(records)
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        if data.record_type != RecordType::Secret {
            // Key material cannot be exported through this API.
            return Err(ConnSurveyorError::record_fetch(
                self.api_name(),
                data.record_type,
                &data.record_id,
            ));
        }

        let url = super::join_url(&self.root, &["secrets", &data.record_id, "value"])?;
        let response = self
            .client
            .request_and_verify(Method::GET, &url, &[], "200", true)
            .await?;

        let value = response
            .body
            .json()
            .and_then(|v| v.get("value"))
            .and_then(|v| v.as_str())
            .filter(|_| response.success);

        match value {
            Some(secret) => Ok(DataDump::text("txt", secret.as_bytes().to_vec())),
            None => Err(ConnSurveyorError::record_fetch(
                self.api_name(),
                data.record_type,
                &data.record_id,
            )),
        }
    }
}
