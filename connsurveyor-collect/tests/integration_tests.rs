//! End-to-end collection tests against in-process stub servers.
//!
//! These drive the full recon and dump passes over a stubbed tenant and
//! verify the on-disk contract other tooling reads: entity JSON under
//! `resources/`, dump files under `data/`, and the full-refresh semantics
//! of the per-environment data tree.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::Path;

use axum::extract::Path as UrlPath;
use axum::routing::get;
use axum::{Json, Router};
use connsurveyor_collect::{DataCollector, PlatformApi, ResourcesCollector};
use connsurveyor_core::models::ResourceType;
use connsurveyor_core::paths;
use connsurveyor_core::transport::ApiClient;
use serde_json::{json, Value};

const ENV_ID: &str = "Default-e1";

/// Binds the router on an ephemeral port and returns its base URL.
async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind stub listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn client() -> ApiClient {
    ApiClient::new("Bearer stub-token").unwrap()
}

fn principal_json() -> Value {
    json!({
        "schema_version": "1.0",
        "entity_type": "principal",
        "entity_id": "p1",
        "display_name": "Alice",
        "principal_id": "p1",
        "principal_type": "User",
        "tenant_id": "t1",
        "email": "alice@contoso.com",
        "upn": "alice@contoso.com",
        "raw_payload": {}
    })
}

fn connection_json(connection_id: &str, connector_id: &str, parameters: Value) -> Value {
    json!({
        "schema_version": "1.0",
        "entity_type": "connection",
        "entity_id": connection_id,
        "display_name": connection_id,
        "connection_id": connection_id,
        "is_valid": true,
        "shareable": true,
        "connector_id": connector_id,
        "api_id": format!("/providers/Microsoft.PowerApps/apis/{connector_id}"),
        "environment_id": ENV_ID,
        "environment_name": "e1",
        "created_at": "2024-03-01T10:00:00Z",
        "last_modified_at": "2024-03-01T10:00:00Z",
        "expiration_time": null,
        "created_by": principal_json(),
        "connection_parameters": parameters,
        "raw_payload": {}
    })
}

fn connector_json(api_name: &str, host: &str, base_path: &str) -> Value {
    json!({
        "schema_version": "1.0",
        "entity_type": "connector",
        "entity_id": api_name,
        "display_name": api_name,
        "api_name": api_name,
        "environment_id": ENV_ID,
        "spec": {
            "host": host,
            "base_path": base_path,
            "security_schemes": ["ApiHubBearerAuth"],
            "raw": {"host": host, "basePath": base_path}
        },
        "version": "1.0",
        "created_at": "2024-01-01T00:00:00Z",
        "last_modified_at": "2024-01-02T00:00:00Z",
        "created_by": "publisher",
        "raw_payload": {}
    })
}

async fn seed_entity(cache: &Path, entity_type: ResourceType, entity_id: &str, entity: &Value) {
    let dir = paths::env_entity_type_path(cache, ENV_ID, entity_type);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(dir.join(format!("{entity_id}.json")), entity.to_string())
        .await
        .unwrap();
}

/// A key vault stub exposing two secrets through the proxied API.
fn key_vault_router() -> Router {
    Router::new()
        .route(
            "/apim/keyvault/kv-1/keys",
            get(|| async { Json(json!({"value": []})) }),
        )
        .route(
            "/apim/keyvault/kv-1/secrets",
            get(|| async {
                Json(json!({"value": [{"name": "db-password"}, {"name": "api-key"}]}))
            }),
        )
        .route(
            "/apim/keyvault/kv-1/secrets/{name}/value",
            get(|UrlPath(name): UrlPath<String>| async move {
                Json(json!({"value": format!("value-of-{name}")}))
            }),
        )
}

fn key_vault_parameters() -> Value {
    json!({
        "accountName": "alice@contoso.com",
        "vaultName": "corp-vault"
    })
}

#[tokio::test]
async fn test_scenario_key_vault_secrets_reach_disk() {
    let base = serve(key_vault_router()).await;
    let cache = tempfile::tempdir().unwrap();

    seed_entity(
        cache.path(),
        ResourceType::Connection,
        "kv-1",
        &connection_json("kv-1", "shared_keyvault", key_vault_parameters()),
    )
    .await;
    seed_entity(
        cache.path(),
        ResourceType::Connector,
        "shared_keyvault",
        &connector_json("shared_keyvault", &base, "/apim/keyvault"),
    )
    .await;

    let collector = DataCollector::new(cache.path(), client(), 1);
    assert!(collector.collect().await.unwrap());

    let secret_dir = paths::env_connections_data_path(cache.path(), ENV_ID)
        .join("shared_keyvault")
        .join("kv-1")
        .join("secret");
    let password = tokio::fs::read_to_string(secret_dir.join("db-password.txt"))
        .await
        .unwrap();
    assert_eq!(password, "value-of-db-password");
    let api_key = tokio::fs::read_to_string(secret_dir.join("api-key.txt"))
        .await
        .unwrap();
    assert_eq!(api_key, "value-of-api-key");
}

#[tokio::test]
async fn test_scenario_nested_blob_file_dumped_under_file_type() {
    // root/invoices/2024/jan.csv: the leaf is three folders deep and must
    // come out of the stack walk and land under record_type=file.
    let router = Router::new()
        .route(
            "/apim/azureblob/blob-1/testconnection",
            get(|| async { Json(json!({})) }),
        )
        .route(
            "/apim/azureblob/blob-1/v2/datasets/corpsa/foldersV2",
            get(|| async {
                Json(json!({"value": [
                    {"Id": "fld-root", "Name": "root", "DisplayName": "root", "IsFolder": true}
                ]}))
            }),
        )
        .route(
            "/apim/azureblob/blob-1/v2/datasets/corpsa/foldersV2/{folder}",
            get(|UrlPath(folder): UrlPath<String>| async move {
                match folder.as_str() {
                    "fld-root" => Json(json!({"value": [
                        {"Id": "fld-inv", "Name": "invoices", "IsFolder": true}
                    ]})),
                    "fld-inv" => Json(json!({"value": [
                        {"Id": "fld-2024", "Name": "2024", "IsFolder": true}
                    ]})),
                    "fld-2024" => Json(json!({"value": [{
                        "Id": "file-jan",
                        "Name": "jan.csv",
                        "Path": "/root/invoices/2024/jan.csv",
                        "MediaType": "text/csv",
                        "IsFolder": false
                    }]})),
                    _ => Json(json!({"value": []})),
                }
            }),
        )
        .route(
            "/apim/azureblob/blob-1/v2/datasets/corpsa/files/file-jan/content",
            get(|| async { "month,total\njan,1200" }),
        );
    let base = serve(router).await;
    let cache = tempfile::tempdir().unwrap();

    let parameters = json!({
        "name": "keyBasedAuth",
        "values": {"accountName": {"value": "corpsa"}}
    });
    seed_entity(
        cache.path(),
        ResourceType::Connection,
        "blob-1",
        &connection_json("blob-1", "shared_azureblob", parameters),
    )
    .await;
    seed_entity(
        cache.path(),
        ResourceType::Connector,
        "shared_azureblob",
        &connector_json("shared_azureblob", &base, "/apim/azureblob"),
    )
    .await;

    let collector = DataCollector::new(cache.path(), client(), 1);
    assert!(collector.collect().await.unwrap());

    let file_path = paths::env_connections_data_path(cache.path(), ENV_ID)
        .join("shared_azureblob")
        .join("blob-1")
        .join("file")
        .join("jan.csv");
    let content = tokio::fs::read_to_string(&file_path).await.unwrap();
    assert_eq!(content, "month,total\njan,1200");
}

#[tokio::test]
async fn test_scenario_unregistered_backend_completes_without_files() {
    let cache = tempfile::tempdir().unwrap();

    seed_entity(
        cache.path(),
        ResourceType::Connection,
        "mystery-1",
        &connection_json("mystery-1", "shared_sharepointonline", json!({})),
    )
    .await;

    // No connector spec, no stub server: the unregistered backend must be
    // skipped before any of that is needed.
    let collector = DataCollector::new(cache.path(), client(), 1);
    assert!(collector.collect().await.unwrap());

    let connections_dir = paths::env_connections_data_path(cache.path(), ENV_ID);
    let written = std::fs::read_dir(&connections_dir)
        .map(|entries| entries.count())
        .unwrap_or(0);
    assert_eq!(written, 0);
}

#[tokio::test]
async fn test_full_refresh_drops_revoked_connection_tree() {
    let base = serve(key_vault_router()).await;
    let cache = tempfile::tempdir().unwrap();

    seed_entity(
        cache.path(),
        ResourceType::Connection,
        "kv-1",
        &connection_json("kv-1", "shared_keyvault", key_vault_parameters()),
    )
    .await;
    // A second connection keeps the environment collectable after kv-1 is
    // revoked.
    seed_entity(
        cache.path(),
        ResourceType::Connection,
        "other-1",
        &connection_json("other-1", "shared_sharepointonline", json!({})),
    )
    .await;
    seed_entity(
        cache.path(),
        ResourceType::Connector,
        "shared_keyvault",
        &connector_json("shared_keyvault", &base, "/apim/keyvault"),
    )
    .await;

    let collector = DataCollector::new(cache.path(), client(), 1);
    assert!(collector.collect().await.unwrap());

    let kv_tree = paths::env_connections_data_path(cache.path(), ENV_ID)
        .join("shared_keyvault")
        .join("kv-1");
    assert!(kv_tree.is_dir());

    // Revoke the connection and run again: its dump tree must not survive.
    let kv_entity = paths::env_entity_type_path(cache.path(), ENV_ID, ResourceType::Connection)
        .join("kv-1.json");
    tokio::fs::remove_file(&kv_entity).await.unwrap();

    assert!(collector.collect().await.unwrap());
    assert!(!kv_tree.exists());
}

#[tokio::test]
async fn test_collect_reports_empty_cache() {
    let cache = tempfile::tempdir().unwrap();
    let collector = DataCollector::new(cache.path(), client(), 1);
    assert!(!collector.collect().await.unwrap());
}

/// A minimal platform stub: one environment, no canvas apps, one key vault
/// connection, and its connector specification.
fn platform_router() -> Router {
    Router::new()
        .route(
            "/providers/Microsoft.PowerApps/environments",
            get(|| async { Json(json!({"value": [{"name": ENV_ID}]})) }),
        )
        .route(
            "/providers/Microsoft.PowerApps/apps",
            get(|| async { Json(json!({"value": []})) }),
        )
        .route(
            "/providers/Microsoft.PowerApps/connections",
            get(|| async {
                Json(json!({"value": [{
                    "name": "kv-1",
                    "properties": {
                        "apiId": "/providers/Microsoft.PowerApps/apis/shared_keyvault",
                        "displayName": "corp vault",
                        "statuses": [{"status": "Connected"}],
                        "allowSharing": true,
                        "environment": {
                            "id": format!("/providers/Microsoft.PowerApps/environments/{ENV_ID}"),
                            "name": ENV_ID
                        },
                        "createdTime": "2024-03-01T10:00:00Z",
                        "lastModifiedTime": "2024-03-02T10:00:00Z",
                        "createdBy": {
                            "id": "p1",
                            "type": "User",
                            "tenantId": "t1",
                            "displayName": "Alice",
                            "email": "alice@contoso.com",
                            "userPrincipalName": "alice@contoso.com"
                        },
                        "accountName": "alice@contoso.com",
                        "connectionParameters": {"vaultName": "corp-vault"}
                    }
                }]}))
            }),
        )
        .route(
            "/providers/Microsoft.PowerApps/apis/shared_keyvault",
            get(|| async {
                Json(json!({
                    "properties": {
                        "swagger": {
                            "host": "tip1-shared.azure-apim.net",
                            "basePath": "/apim/keyvault",
                            "info": {"version": "1.0"},
                            "paths": {"/{connectionId}/secrets": {}}
                        },
                        "createdTime": "2024-01-01T00:00:00Z",
                        "changedTime": "2024-01-02T00:00:00Z",
                        "publisher": "Contoso"
                    }
                }))
            }),
        )
}

/// Every cached file's relative path and contents.
fn snapshot(root: &Path) -> BTreeMap<String, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<u8>>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().display().to_string();
                out.insert(relative, std::fs::read(&path).unwrap());
            }
        }
    }

    let mut out = BTreeMap::new();
    if root.is_dir() {
        walk(root, root, &mut out);
    }
    out
}

#[tokio::test]
async fn test_recon_twice_is_byte_identical() {
    let base = serve(platform_router()).await;
    let cache = tempfile::tempdir().unwrap();

    let collector = ResourcesCollector::new(PlatformApi::new(client(), base.clone()), cache.path());
    collector.collect_and_cache().await.unwrap();
    let first = snapshot(cache.path());

    assert!(first.contains_key(&format!("resources/{ENV_ID}/connection/kv-1.json")));
    assert!(first.contains_key(&format!("resources/{ENV_ID}/connector/shared_keyvault.json")));

    collector.collect_and_cache().await.unwrap();
    let second = snapshot(cache.path());

    assert_eq!(first, second);
}
