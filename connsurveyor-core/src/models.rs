//! Canonical entity model shared by the collectors and the cache loaders.
//!
//! Two families of types live here. Resource entities (`Connection`,
//! `Connector`, `CanvasApp`, `Principal`) are persisted to the cache tree as
//! JSON and carry a `schema_version` that loaders verify before trusting the
//! file. Data entities (`DataStore`, `DataRecord`, `DataDump`) are ephemeral:
//! they exist only for the duration of a data collection pass and are
//! persisted solely as the final dump file contents.
//!
//! # Security Guarantees
//! - `connection_parameters` may contain backend secrets and is written only
//!   to the operator-chosen cache path, never to logs
//! - No bearer credential ever appears in any entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version stamped into every cached entity.
///
/// Loaders reject any file whose `schema_version` differs, so a cache
/// produced by an incompatible build fails fast instead of being silently
/// misread.
pub const SCHEMA_VERSION: &str = "1.0";

/// Text encoding used for every textual dump.
pub const ENCODING: &str = "utf-8";

/// Resource entity kinds, used as directory names in the cache tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Connection,
    Connector,
    CanvasApp,
    Principal,
}

impl ResourceType {
    /// Stable on-disk name of this entity kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            ResourceType::Connection => "connection",
            ResourceType::Connector => "connector",
            ResourceType::CanvasApp => "canvas_app",
            ResourceType::Principal => "principal",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of dumpable units, used as directory names under a connection's
/// dump tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    Table,
    Collection,
    Attachment,
    Email,
    Secret,
    Key,
    File,
    QueueMessage,
}

impl RecordType {
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordType::Table => "table",
            RecordType::Collection => "collection",
            RecordType::Attachment => "attachment",
            RecordType::Email => "email",
            RecordType::Secret => "secret",
            RecordType::Key => "key",
            RecordType::File => "file",
            RecordType::QueueMessage => "queue_message",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An identity referenced by other entities: a connection's creator or a
/// principal a canvas app is shared with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub schema_version: String,
    pub entity_type: ResourceType,
    pub entity_id: String,
    pub display_name: Option<String>,
    pub principal_id: String,
    pub principal_type: String,
    pub tenant_id: String,
    pub email: Option<String>,
    pub upn: Option<String>,
    pub raw_payload: serde_json::Value,
}

/// A tenant-configured, authenticated link between the platform and one
/// external API instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub schema_version: String,
    pub entity_type: ResourceType,
    pub entity_id: String,
    pub display_name: Option<String>,

    pub connection_id: String,

    /// Every backend health status reports "Connected".
    pub is_valid: bool,
    pub shareable: bool,

    /// Trimmed connector id, e.g. `shared_keyvault`.
    pub connector_id: String,
    /// Full provider-qualified API path the connector id was trimmed from.
    pub api_id: String,

    pub environment_id: String,
    pub environment_name: String,

    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub expiration_time: Option<DateTime<Utc>>,

    pub created_by: Principal,

    /// Backend-specific auth and configuration values. May contain secrets;
    /// written only to the cache tree, never logged.
    pub connection_parameters: serde_json::Value,

    pub raw_payload: serde_json::Value,
}

impl Connection {
    /// Last path segment of the provider-qualified API identifier, the key
    /// the connector dispatch table is looked up with.
    pub fn api_name(&self) -> &str {
        self.api_id.rsplit('/').next().unwrap_or(&self.api_id)
    }
}

/// Backend capability description extracted from a connector's OpenAPI-like
/// specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorSpec {
    pub host: String,
    pub base_path: String,
    /// Names of the declared security schemes, bearer scheme included.
    pub security_schemes: Vec<String>,
    /// The full specification document as fetched (plus the injected bearer
    /// scheme), kept for downstream consumers.
    pub raw: serde_json::Value,
}

impl ConnectorSpec {
    /// Returns the specification with every `{connectionId}` path template
    /// substituted for the given connection.
    ///
    /// The shared specification is parameterized over connection; consumers
    /// that want concrete call paths need this connection-scoped variant.
    pub fn scoped(&self, connection_id: &str) -> serde_json::Value {
        let mut spec = self.raw.clone();
        if let Some(paths) = spec.get("paths").and_then(|p| p.as_object()).cloned() {
            let rewritten: serde_json::Map<String, serde_json::Value> = paths
                .into_iter()
                .map(|(path, item)| (path.replace("{connectionId}", connection_id), item))
                .collect();
            spec["paths"] = serde_json::Value::Object(rewritten);
        }
        spec
    }

    /// Base URL every connection-scoped call starts from.
    ///
    /// Hosts are declared without a scheme in real specifications; a host
    /// that carries an explicit scheme is used verbatim.
    pub fn connection_root(&self, connection_id: &str) -> String {
        if self.host.contains("://") {
            format!("{}{}/{}", self.host, self.base_path, connection_id)
        } else {
            format!("https://{}{}/{}", self.host, self.base_path, connection_id)
        }
    }
}

/// A connector specification fetched for one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connector {
    pub schema_version: String,
    pub entity_type: ResourceType,
    pub entity_id: String,
    pub display_name: Option<String>,

    pub api_name: String,
    pub environment_id: String,

    pub spec: ConnectorSpec,
    pub version: String,

    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub created_by: String,

    pub raw_payload: serde_json::Value,
}

/// A canvas application shared with the whole tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanvasApp {
    pub schema_version: String,
    pub entity_type: ResourceType,
    pub entity_id: String,
    pub display_name: Option<String>,

    pub version: String,
    pub run_url: String,
    pub environment_id: String,

    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    pub created_by: Principal,

    /// Principals the app is shared with.
    pub permissions: Vec<Principal>,

    pub raw_payload: serde_json::Value,
}

/// Backend-specific context a [`DataStore`] carries into later calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreExtra {
    /// No extra context needed by this backend.
    None,
    /// Blob storage: the account and the root folder this store covers.
    Blob {
        storage_account: String,
        folder_id: String,
    },
    /// Spreadsheet drives: the source and drive the file tree hangs off.
    Drive { source_id: String, drive_id: String },
}

impl StoreExtra {
    pub fn as_blob(&self) -> Option<(&str, &str)> {
        match self {
            StoreExtra::Blob {
                storage_account,
                folder_id,
            } => Some((storage_account, folder_id)),
            _ => None,
        }
    }

    pub fn as_drive(&self) -> Option<(&str, &str)> {
        match self {
            StoreExtra::Drive {
                source_id,
                drive_id,
            } => Some((source_id, drive_id)),
            _ => None,
        }
    }
}

/// Backend-specific context a [`DataRecord`] carries into its dump call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordExtra {
    None,
    /// Relational and document backends: which database the record lives in.
    Database { database: String },
    /// Blob files: full path and declared media type.
    File { path: String, media_type: String },
    /// Workbook tables: the file the table was found in.
    WorkbookTable { file_id: String },
    /// Mailbox items: whether the body is HTML.
    Email { is_html: bool },
    /// Mail attachments: declared content type, extension is parsed from it.
    Attachment { content_type: String },
}

impl RecordExtra {
    pub fn database(&self) -> Option<&str> {
        match self {
            RecordExtra::Database { database } => Some(database),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<(&str, &str)> {
        match self {
            RecordExtra::File { path, media_type } => Some((path, media_type)),
            _ => None,
        }
    }
}

/// One addressable data container reachable through a connection: a vault,
/// a mailbox, a storage-account folder, a database server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStore {
    pub account: String,
    pub tenant: Option<String>,
    pub scope: Option<String>,
    pub host: String,
    pub name: Option<String>,
    pub extra: StoreExtra,
}

impl DataStore {
    /// Builds a store, deriving the tenant from the account's mail domain
    /// when no tenant was given and the account looks like an email address.
    pub fn new(
        account: impl Into<String>,
        tenant: Option<String>,
        scope: Option<String>,
        host: impl Into<String>,
        name: Option<String>,
        extra: StoreExtra,
    ) -> Self {
        let account = account.into();
        let tenant = tenant.filter(|t| !t.is_empty()).or_else(|| {
            if account.matches('@').count() == 1 {
                account.rsplit('@').next().map(str::to_string)
            } else {
                None
            }
        });
        Self {
            account,
            tenant,
            scope,
            host: host.into(),
            name,
            extra,
        }
    }
}

/// One dumpable unit inside a [`DataStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecord {
    pub record_type: RecordType,
    pub record_id: String,
    pub record_name: Option<String>,
    pub extra: RecordExtra,
}

/// The materialized content of a [`DataRecord`]. An absent encoding means
/// the content is binary and is written to disk verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDump {
    pub extension: String,
    pub encoding: Option<String>,
    pub content: Vec<u8>,
}

impl DataDump {
    /// A textual dump in the tool-wide encoding.
    pub fn text(extension: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            extension: extension.into(),
            encoding: Some(ENCODING.to_string()),
            content,
        }
    }

    /// A binary dump written to disk without decoding.
    pub fn binary(extension: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            extension: extension.into(),
            encoding: None,
            content,
        }
    }
}

/// A [`DataStore`] plus the connection it was enumerated from, so every
/// downstream entity stays traceable without re-querying the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataStoreWithContext {
    pub api_name: String,
    pub connection_id: String,
    pub store: DataStore,
}

/// A [`DataRecord`] plus its originating store context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRecordWithContext {
    pub store: DataStoreWithContext,
    pub record: DataRecord,
}

/// A [`DataDump`] plus its originating record context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDumpWithContext {
    pub record: DataRecordWithContext,
    pub dump: DataDump,
}
