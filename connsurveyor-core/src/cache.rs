//! Read-only loaders reconstructing cached entities from disk.
//!
//! Every call re-parses from disk; no in-memory cache is kept. That keeps
//! the loaders trivially correct when the collector and a downstream
//! consumer run as separate processes, at the cost of a little I/O.
//!
//! Each load verifies the file's `schema_version` before deserializing the
//! full entity and fails hard on a mismatch: a stale cache written by an
//! incompatible build must never be silently misread.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tokio::fs;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{CanvasApp, Connection, Connector, ResourceType, SCHEMA_VERSION};
use crate::paths;

/// Connector id whose connections represent logic flows rather than data
/// backends.
pub const LOGIC_FLOWS_CONNECTOR_ID: &str = "shared_logicflows";

/// Environment ids present in the resource cache.
///
/// An absent resources tree is an empty cache, not an error; the caller
/// decides whether to suggest running recon first.
pub async fn environment_ids(cache_path: &Path) -> Result<Vec<String>> {
    let root = paths::resources_path(cache_path);
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut ids = Vec::new();
    let mut entries = fs::read_dir(&root)
        .await
        .map_err(|e| ConnSurveyorError::io(root.display().to_string(), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConnSurveyorError::io(root.display().to_string(), e))?
    {
        if entry.path().is_dir()
            && let Some(name) = entry.file_name().to_str()
        {
            ids.push(name.to_string());
        }
    }
    ids.sort();
    Ok(ids)
}

/// All cached connections, across every environment or scoped to one.
///
/// Logic-flow connections are included by default; pass `false` to filter
/// them out for consumers that only care about data backends.
pub async fn load_connections(
    cache_path: &Path,
    env_id: Option<&str>,
    with_logic_flows: bool,
) -> Result<Vec<Connection>> {
    let connections: Vec<Connection> =
        load_entities(cache_path, env_id, ResourceType::Connection).await?;
    Ok(connections
        .into_iter()
        .filter(|c| with_logic_flows || c.connector_id != LOGIC_FLOWS_CONNECTOR_ID)
        .collect())
}

/// Only the logic-flow connections.
pub async fn load_logic_flows(cache_path: &Path, env_id: Option<&str>) -> Result<Vec<Connection>> {
    let connections: Vec<Connection> =
        load_entities(cache_path, env_id, ResourceType::Connection).await?;
    Ok(connections
        .into_iter()
        .filter(|c| c.connector_id == LOGIC_FLOWS_CONNECTOR_ID)
        .collect())
}

/// All cached canvas apps.
pub async fn load_canvas_apps(cache_path: &Path, env_id: Option<&str>) -> Result<Vec<CanvasApp>> {
    load_entities(cache_path, env_id, ResourceType::CanvasApp).await
}

/// All cached connector specifications.
pub async fn load_connectors(cache_path: &Path, env_id: Option<&str>) -> Result<Vec<Connector>> {
    load_entities(cache_path, env_id, ResourceType::Connector).await
}

/// One connection by id.
pub async fn get_connection(
    cache_path: &Path,
    env_id: &str,
    connection_id: &str,
) -> Result<Connection> {
    let path = paths::env_entity_type_path(cache_path, env_id, ResourceType::Connection)
        .join(format!("{connection_id}.json"));
    load_entity(&path).await
}

/// One connector specification by api name.
pub async fn get_connector(cache_path: &Path, env_id: &str, api_name: &str) -> Result<Connector> {
    let path = paths::env_entity_type_path(cache_path, env_id, ResourceType::Connector)
        .join(format!("{api_name}.json"));
    load_entity(&path).await
}

async fn load_entities<T: DeserializeOwned>(
    cache_path: &Path,
    env_id: Option<&str>,
    entity_type: ResourceType,
) -> Result<Vec<T>> {
    let env_ids = match env_id {
        Some(id) => vec![id.to_string()],
        None => environment_ids(cache_path).await?,
    };

    let mut entities = Vec::new();
    for env in env_ids {
        let dir = paths::env_entity_type_path(cache_path, &env, entity_type);
        if !dir.is_dir() {
            continue;
        }
        for path in json_files(&dir).await? {
            entities.push(load_entity(&path).await?);
        }
    }
    Ok(entities)
}

async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| ConnSurveyorError::io(dir.display().to_string(), e))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConnSurveyorError::io(dir.display().to_string(), e))?
    {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn load_entity<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path)
        .await
        .map_err(|e| ConnSurveyorError::io(path.display().to_string(), e))?;

    let value: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|e| ConnSurveyorError::serialization(path.display().to_string(), e))?;

    // Version gate before shape-sensitive deserialization: a mismatched
    // file must fail as a version problem, not a confusing field error.
    let found = value
        .get("schema_version")
        .and_then(|v| v.as_str())
        .unwrap_or("<missing>");
    if found != SCHEMA_VERSION {
        return Err(ConnSurveyorError::SchemaVersion {
            path: path.display().to_string(),
            expected: SCHEMA_VERSION.to_string(),
            found: found.to_string(),
        });
    }

    serde_json::from_value(value)
        .map_err(|e| ConnSurveyorError::serialization(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Principal, SCHEMA_VERSION};

    fn sample_connection_json(connector_id: &str, version: &str) -> serde_json::Value {
        serde_json::json!({
            "schema_version": version,
            "entity_type": "connection",
            "entity_id": "c1",
            "display_name": "conn",
            "connection_id": "c1",
            "is_valid": true,
            "shareable": true,
            "connector_id": connector_id,
            "api_id": format!("/providers/Microsoft.PowerApps/apis/{connector_id}"),
            "environment_id": "Default-e1",
            "environment_name": "e1",
            "created_at": "2024-03-01T10:00:00Z",
            "last_modified_at": "2024-03-01T10:00:00Z",
            "expiration_time": null,
            "created_by": {
                "schema_version": version,
                "entity_type": "principal",
                "entity_id": "p1",
                "display_name": null,
                "principal_id": "p1",
                "principal_type": "User",
                "tenant_id": "t1",
                "email": null,
                "upn": null,
                "raw_payload": {}
            },
            "connection_parameters": {},
            "raw_payload": {}
        })
    }

    async fn seed_connection(cache: &Path, env: &str, id: &str, json: &serde_json::Value) {
        let dir = paths::env_entity_type_path(cache, env, ResourceType::Connection);
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join(format!("{id}.json")), json.to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_cache_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ids = environment_ids(tmp.path()).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_schema_version_mismatch_is_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let stale = sample_connection_json("shared_sql", "0.9");
        seed_connection(tmp.path(), "Default-e1", "c1", &stale).await;

        let err = load_connections(tmp.path(), None, true).await.unwrap_err();
        match err {
            ConnSurveyorError::SchemaVersion {
                expected, found, ..
            } => {
                assert_eq!(expected, SCHEMA_VERSION);
                assert_eq!(found, "0.9");
            }
            other => panic!("expected schema version error, got {other}"),
        }
    }

    #[tokio::test]
    async fn test_logic_flow_filtering() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = sample_connection_json("shared_keyvault", SCHEMA_VERSION);
        let mut flow = sample_connection_json(LOGIC_FLOWS_CONNECTOR_ID, SCHEMA_VERSION);
        flow["entity_id"] = "c2".into();
        flow["connection_id"] = "c2".into();
        seed_connection(tmp.path(), "Default-e1", "c1", &kv).await;
        seed_connection(tmp.path(), "Default-e1", "c2", &flow).await;

        let all = load_connections(tmp.path(), Some("Default-e1"), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let data_only = load_connections(tmp.path(), Some("Default-e1"), false)
            .await
            .unwrap();
        assert_eq!(data_only.len(), 1);
        assert_eq!(data_only[0].connector_id, "shared_keyvault");

        let flows = load_logic_flows(tmp.path(), Some("Default-e1")).await.unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].connection_id, "c2");
    }

    #[tokio::test]
    async fn test_get_connection_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let kv = sample_connection_json("shared_keyvault", SCHEMA_VERSION);
        seed_connection(tmp.path(), "Default-e1", "c1", &kv).await;

        let connection = get_connection(tmp.path(), "Default-e1", "c1").await.unwrap();
        assert_eq!(connection.api_name(), "shared_keyvault");
        assert!(matches!(
            connection.created_by,
            Principal { ref principal_id, .. } if principal_id == "p1"
        ));
    }
}
