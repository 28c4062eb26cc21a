//! Connector framework: one uniform three-phase contract over every
//! supported backend family.
//!
//! Each backend implements [`ConnectorClient`] — `ping` validates the
//! connection and enumerates top-level stores, `enum_records` lists the
//! dumpable units inside one store, `dump` fetches one record's content.
//! [`BackendKind`] is the closed dispatch table from a connection's declared
//! api name to its implementation; connector ids with no entry are skipped
//! by the data collector, never treated as errors.
//!
//! # Security Guarantees
//! - Every backend call is a GET; enumeration and dumping never mutate
//!   remote state
//! - Connection parameters are read for addressing only and never logged

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Connector, DataDump, DataDumpWithContext, DataRecord, DataRecordWithContext, DataStore,
    DataStoreWithContext,
};
use crate::transport::ApiClient;

mod azure_blob;
mod azure_queues;
mod azure_tables;
mod document_db;
mod excel;
mod github;
mod gmail;
mod key_vault;
mod sql;

pub use azure_blob::AzureBlobConnector;
pub use azure_queues::AzureQueuesConnector;
pub use azure_tables::AzureTablesConnector;
pub use document_db::DocumentDbConnector;
pub use excel::ExcelOnlineBusinessConnector;
pub use github::GitHubConnector;
pub use gmail::GmailConnector;
pub use key_vault::KeyVaultConnector;
pub use sql::SqlConnector;

/// The closed set of backend families with an implementation.
///
/// Keeping this an enum rather than a runtime string map means a missing
/// registration is a compile error; unknown connector ids still resolve to
/// `None` and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    KeyVault,
    Sql,
    DocumentDb,
    AzureBlob,
    AzureTables,
    AzureQueues,
    Gmail,
    ExcelOnlineBusiness,
    GitHub,
}

impl BackendKind {
    /// Every registered backend, in dispatch-table order.
    pub const ALL: [BackendKind; 9] = [
        BackendKind::KeyVault,
        BackendKind::Sql,
        BackendKind::DocumentDb,
        BackendKind::AzureBlob,
        BackendKind::AzureTables,
        BackendKind::AzureQueues,
        BackendKind::Gmail,
        BackendKind::ExcelOnlineBusiness,
        BackendKind::GitHub,
    ];

    /// Resolves a connection's declared api name; `None` for backends the
    /// tool has no implementation for.
    pub fn from_api_name(api_name: &str) -> Option<Self> {
        match api_name {
            "shared_keyvault" => Some(BackendKind::KeyVault),
            "shared_sql" => Some(BackendKind::Sql),
            "shared_documentdb" => Some(BackendKind::DocumentDb),
            "shared_azureblob" => Some(BackendKind::AzureBlob),
            "shared_azuretables" => Some(BackendKind::AzureTables),
            "shared_azurequeues" => Some(BackendKind::AzureQueues),
            "shared_gmail" => Some(BackendKind::Gmail),
            "shared_excelonlinebusiness" => Some(BackendKind::ExcelOnlineBusiness),
            "shared_github" => Some(BackendKind::GitHub),
            _ => None,
        }
    }

    /// The stable dispatch key.
    pub const fn api_name(self) -> &'static str {
        match self {
            BackendKind::KeyVault => "shared_keyvault",
            BackendKind::Sql => "shared_sql",
            BackendKind::DocumentDb => "shared_documentdb",
            BackendKind::AzureBlob => "shared_azureblob",
            BackendKind::AzureTables => "shared_azuretables",
            BackendKind::AzureQueues => "shared_azurequeues",
            BackendKind::Gmail => "shared_gmail",
            BackendKind::ExcelOnlineBusiness => "shared_excelonlinebusiness",
            BackendKind::GitHub => "shared_github",
        }
    }
}

/// The per-backend contract.
///
/// `ping` must tolerate connections whose auth shape doesn't match the
/// backend and return an empty store list rather than erroring: the
/// dispatch table is keyed by declared connector id, and a backend may
/// legitimately receive parameters for an auth variant it does not support.
///
/// `dump` failures scoped to a single record are raised as
/// [`crate::error::ConnSurveyorError::RecordFetch`] so the data collector
/// can skip the record and keep the rest of the connection's data.
#[async_trait]
pub trait ConnectorClient: Send + Sync {
    /// Stable dispatch key, e.g. `shared_keyvault`.
    fn api_name(&self) -> &'static str;

    /// Validates reachability and enumerates top-level stores.
    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>>;

    /// Lists the dumpable units inside one store.
    async fn enum_records(&self, store: &DataStoreWithContext) -> Result<Vec<DataRecord>>;

    /// Fetches the content of exactly one record.
    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump>;
}

/// A backend bound to one connection, wrapping every result in its context
/// so dumps stay traceable to the connection they came from.
pub struct BoundConnector {
    inner: Box<dyn ConnectorClient>,
    connection_id: String,
}

impl BoundConnector {
    pub fn api_name(&self) -> &'static str {
        self.inner.api_name()
    }

    /// See [`ConnectorClient::ping`].
    pub async fn ping(
        &self,
        connection_parameters: &serde_json::Value,
    ) -> Result<Vec<DataStoreWithContext>> {
        let stores = self.inner.ping(connection_parameters).await?;
        Ok(stores
            .into_iter()
            .map(|store| DataStoreWithContext {
                api_name: self.inner.api_name().to_string(),
                connection_id: self.connection_id.clone(),
                store,
            })
            .collect())
    }

    /// See [`ConnectorClient::enum_records`].
    pub async fn enum_records(
        &self,
        store: &DataStoreWithContext,
    ) -> Result<Vec<DataRecordWithContext>> {
        let records = self.inner.enum_records(store).await?;
        Ok(records
            .into_iter()
            .map(|record| DataRecordWithContext {
                store: store.clone(),
                record,
            })
            .collect())
    }

    /// See [`ConnectorClient::dump`].
    pub async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDumpWithContext> {
        let dump = self.inner.dump(record).await?;
        Ok(DataDumpWithContext {
            record: record.clone(),
            dump,
        })
    }
}

/// Binds a connection to its backend implementation.
///
/// The connection-scoped root URL every backend call starts from is
/// precomputed from the connector specification. Returns `None` when the
/// specification's api name has no registered backend.
pub fn bind(client: ApiClient, spec: &Connector, connection_id: &str) -> Option<BoundConnector> {
    let kind = BackendKind::from_api_name(&spec.api_name)?;
    let root = spec.spec.connection_root(connection_id);

    let inner: Box<dyn ConnectorClient> = match kind {
        BackendKind::KeyVault => Box::new(KeyVaultConnector::new(client, root)),
        BackendKind::Sql => Box::new(SqlConnector::new(client, root)),
        BackendKind::DocumentDb => Box::new(DocumentDbConnector::new(client, root)),
        BackendKind::AzureBlob => Box::new(AzureBlobConnector::new(client, root)),
        BackendKind::AzureTables => Box::new(AzureTablesConnector::new(client, root)),
        BackendKind::AzureQueues => Box::new(AzureQueuesConnector::new(client, root)),
        BackendKind::Gmail => Box::new(GmailConnector::new(client, root)),
        BackendKind::ExcelOnlineBusiness => Box::new(ExcelOnlineBusinessConnector::new(client, root)),
        BackendKind::GitHub => Box::new(GitHubConnector::new(client, root)),
    };

    Some(BoundConnector {
        inner,
        connection_id: connection_id.to_string(),
    })
}

/// Appends percent-encoded path segments to a root URL.
///
/// Backend-supplied identifiers (file ids, table names) routinely carry
/// characters that are not valid raw path bytes.
pub(crate) fn join_url(root: &str, segments: &[&str]) -> Result<String> {
    let mut url = url::Url::parse(root).map_err(|_| {
        crate::error::ConnSurveyorError::invalid_response(format!(
            "Connector root is not a valid URL: {root}"
        ))
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            crate::error::ConnSurveyorError::invalid_response(format!(
                "Connector root cannot carry path segments: {root}"
            ))
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url.to_string())
}

/// A top-level string entry in a connection's parameter bag.
pub(crate) fn str_param<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

/// A `values.<key>.value` string entry, the shape parameter-set auth
/// variants use.
pub(crate) fn set_param<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get("values")
        .and_then(|v| v.get(key))
        .and_then(|v| v.get("value"))
        .and_then(|v| v.as_str())
}
