//! Resource collection: enumerate a tenant's environments and cache their
//! canvas apps, connections, and connector specifications as JSON entities.
//!
//! Collection order within an environment is fixed: canvas apps first,
//! then connections, then the specifications of exactly the distinct
//! connectors those connections reference — never the full connector
//! catalog, to bound API calls. Entity writes are whole-file and
//! last-write-wins; re-running recon is the supported way to refresh
//! stale resource metadata.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use connsurveyor_core::cache::LOGIC_FLOWS_CONNECTOR_ID;
use connsurveyor_core::error::{ConnSurveyorError, Result};
use connsurveyor_core::models::{
    CanvasApp, Connection, Connector, ConnectorSpec, Principal, ResourceType, SCHEMA_VERSION,
};
use connsurveyor_core::paths;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::api::PlatformApi;

/// Name of the bearer scheme injected into every cached specification so
/// downstream consumers see how calls are authorized.
const SPEC_BEARER_SCHEME: &str = "ApiHubBearerAuth";

const ENVIRONMENT_ID_PREFIX: &str = "/providers/Microsoft.PowerApps/environments/";
const API_ID_PREFIX: &str = "/providers/Microsoft.PowerApps/apis/";

/// Enumerates resources and caches them under `<cache>/resources/`.
pub struct ResourcesCollector {
    api: PlatformApi,
    cache_path: PathBuf,
}

impl ResourcesCollector {
    pub fn new(api: PlatformApi, cache_path: impl Into<PathBuf>) -> Self {
        Self {
            api,
            cache_path: cache_path.into(),
        }
    }

    /// Collects every environment's resources into the cache.
    ///
    /// # Errors
    /// A 403 or 400 on a single connector's specification is logged and
    /// that connector skipped; any other transport failure aborts the
    /// environment's collection.
    pub async fn collect_and_cache(&self) -> Result<()> {
        let environment_ids = self.api.list_environments().await?;
        info!("Found {} environments", environment_ids.len());

        for environment_id in &environment_ids {
            self.collect_canvas_apps(environment_id).await?;
            let connector_to_connections = self.collect_connections(environment_id).await?;
            self.collect_connectors(environment_id, &connector_to_connections)
                .await?;
        }

        Ok(())
    }

    async fn collect_canvas_apps(&self, environment_id: &str) -> Result<()> {
        let raw_apps = self.api.list_canvas_apps(environment_id).await?;
        let total = raw_apps.len();
        let mut kept = 0usize;

        for raw_app in &raw_apps {
            let Some(app_id) = raw_app.get("name").and_then(|v| v.as_str()) else {
                continue;
            };
            let permissions = self
                .api
                .list_canvas_app_permissions(app_id, environment_id)
                .await?;

            // Only apps shared with the whole tenant are interesting.
            let tenant_shared = permissions.iter().any(|rbac| {
                principal_of(rbac).and_then(|p| p.get("type")).and_then(|t| t.as_str())
                    == Some("Tenant")
            });
            if !tenant_shared {
                continue;
            }
            kept += 1;

            let app = parse_canvas_app(raw_app, &permissions)?;
            self.write_entity(environment_id, ResourceType::CanvasApp, &app.entity_id, &app)
                .await?;
        }

        info!(
            "Found {} widely shared canvas apps out of {} in environment {}",
            kept, total, environment_id
        );
        Ok(())
    }

    /// Caches the environment's connections and returns the distinct
    /// connector ids they reference, mapped to their connection ids.
    async fn collect_connections(
        &self,
        environment_id: &str,
    ) -> Result<BTreeMap<String, Vec<String>>> {
        let raw_connections = self.api.list_connections(environment_id).await?;
        let total = raw_connections.len();
        let mut connector_to_connections: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut kept = 0usize;

        for raw_connection in &raw_connections {
            if !should_keep_connection(raw_connection) {
                continue;
            }
            kept += 1;

            let connection = parse_connection(raw_connection)?;
            connector_to_connections
                .entry(connection.connector_id.clone())
                .or_default()
                .push(connection.connection_id.clone());

            self.write_entity(
                environment_id,
                ResourceType::Connection,
                &connection.entity_id,
                &connection,
            )
            .await?;
        }

        info!(
            "Found {} active shareable connections out of {} in environment {}",
            kept, total, environment_id
        );
        Ok(connector_to_connections)
    }

    async fn collect_connectors(
        &self,
        environment_id: &str,
        connector_to_connections: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        for (connector_id, connection_ids) in connector_to_connections {
            info!("Fetching specification for connector {}", connector_id);

            let raw = match self.api.get_connector(environment_id, connector_id).await {
                Ok(raw) => raw,
                Err(ConnSurveyorError::UnexpectedStatus { status: 403, .. }) => {
                    warn!(
                        "No access to custom connector specification for {}, skipping",
                        connector_id
                    );
                    continue;
                }
                Err(ConnSurveyorError::UnexpectedStatus { status: 400, .. }) => {
                    error!(
                        "Failed to get connector {} for connections {:?}",
                        connector_id, connection_ids
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            let connector = parse_connector(&raw, connector_id, environment_id)?;
            self.write_entity(
                environment_id,
                ResourceType::Connector,
                &connector.entity_id,
                &connector,
            )
            .await?;
        }

        Ok(())
    }

    /// Whole-file, last-write-wins entity write.
    async fn write_entity<T: Serialize>(
        &self,
        environment_id: &str,
        entity_type: ResourceType,
        entity_id: &str,
        entity: &T,
    ) -> Result<()> {
        let dir = paths::env_entity_type_path(&self.cache_path, environment_id, entity_type);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| ConnSurveyorError::io(dir.display().to_string(), e))?;

        let path = dir.join(format!("{}.json", paths::sanitize_file_name(entity_id)));
        let json = serde_json::to_string_pretty(entity)
            .map_err(|e| ConnSurveyorError::serialization(path.display().to_string(), e))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| ConnSurveyorError::io(path.display().to_string(), e))?;
        Ok(())
    }
}

/// Connection filter: keep logic flows unconditionally; anything else must
/// be both connected and explicitly shareable.
pub(crate) fn should_keep_connection(raw: &Value) -> bool {
    let properties = &raw["properties"];
    let api_id = properties["apiId"].as_str().unwrap_or_default();
    if api_id == format!("{API_ID_PREFIX}{LOGIC_FLOWS_CONNECTOR_ID}") {
        return true;
    }

    let first_status = properties["statuses"]
        .get(0)
        .and_then(|s| s.get("status"))
        .and_then(|s| s.as_str());
    let shareable = properties["allowSharing"].as_bool().unwrap_or(false);
    first_status == Some("Connected") && shareable
}

fn parse_connection(raw: &Value) -> Result<Connection> {
    let properties = &raw["properties"];
    let connection_id = string_field(raw, "name")?;
    let api_id = string_field(properties, "apiId")?;
    let connector_id = api_id.replace(API_ID_PREFIX, "");

    let is_valid = properties["statuses"]
        .as_array()
        .map(|statuses| {
            !statuses.is_empty()
                && statuses
                    .iter()
                    .all(|s| s.get("status").and_then(|v| v.as_str()) == Some("Connected"))
        })
        .unwrap_or(false);

    // Parameter-set and plain-parameter auth variants are merged into one
    // bag alongside the account name; later consumers probe for whichever
    // shape their backend expects.
    let mut connection_parameters = serde_json::Map::new();
    connection_parameters.insert(
        "accountName".to_string(),
        properties.get("accountName").cloned().unwrap_or(Value::Null),
    );
    for source in ["connectionParameters", "connectionParametersSet"] {
        if let Some(bag) = properties.get(source).and_then(|v| v.as_object()) {
            for (key, value) in bag {
                connection_parameters.insert(key.clone(), value.clone());
            }
        }
    }

    let environment_id = string_field(&properties["environment"], "id")?
        .replace(ENVIRONMENT_ID_PREFIX, "")
        .replace("default", "Default");

    Ok(Connection {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::Connection,
        entity_id: connection_id.clone(),
        display_name: properties
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        connection_id,
        is_valid,
        shareable: properties["allowSharing"].as_bool().unwrap_or(false),
        connector_id,
        api_id,
        environment_id,
        environment_name: string_field(&properties["environment"], "name")?,
        created_at: timestamp_field(properties, "createdTime")?,
        last_modified_at: timestamp_field(properties, "lastModifiedTime")?,
        expiration_time: properties
            .get("expirationTime")
            .and_then(|v| v.as_str())
            .map(parse_timestamp)
            .transpose()?,
        created_by: parse_principal(&properties["createdBy"]),
        connection_parameters: Value::Object(connection_parameters),
        raw_payload: raw.clone(),
    })
}

fn parse_canvas_app(raw: &Value, permissions: &[Value]) -> Result<CanvasApp> {
    let properties = &raw["properties"];

    let principals = permissions
        .iter()
        .filter_map(|rbac| {
            let principal = principal_of(rbac)?;
            if principal.get("type").and_then(|t| t.as_str()) == Some("Tenant") {
                Some(parse_tenant_principal(principal, rbac))
            } else {
                Some(parse_principal_with_raw(principal, rbac))
            }
        })
        .collect();

    let environment_id = string_field(&properties["environment"], "name")?
        .replace("default", "Default");

    Ok(CanvasApp {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::CanvasApp,
        entity_id: string_field(raw, "name")?,
        display_name: properties
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        version: string_field(properties, "appVersion")?,
        run_url: string_field(properties, "appPlayUri")?,
        environment_id,
        created_at: timestamp_field(properties, "createdTime")?,
        last_modified_at: timestamp_field(properties, "lastModifiedTime")?,
        created_by: parse_principal(&properties["createdBy"]),
        permissions: principals,
        raw_payload: raw.clone(),
    })
}

fn parse_connector(raw: &Value, connector_id: &str, environment_id: &str) -> Result<Connector> {
    let properties = &raw["properties"];
    let mut swagger = properties.get("swagger").cloned().unwrap_or(json!({}));

    // Record how calls against this backend are authorized: the injected
    // bearer scheme becomes part of the cached specification.
    let mut definitions = swagger["securityDefinitions"]
        .as_object()
        .cloned()
        .unwrap_or_default();
    definitions.insert(
        SPEC_BEARER_SCHEME.to_string(),
        json!({
            "name": "Authorization",
            "in": "header",
            "type": "apiKey",
            "description": "JWT Authorization header",
        }),
    );
    swagger["securityDefinitions"] = Value::Object(definitions);

    let mut security = swagger["security"].as_array().cloned().unwrap_or_default();
    security.push(json!({ SPEC_BEARER_SCHEME: [] }));
    swagger["security"] = Value::Array(security);

    let spec = ConnectorSpec {
        host: string_field(&swagger, "host")?,
        base_path: string_field(&swagger, "basePath")?,
        security_schemes: swagger["securityDefinitions"]
            .as_object()
            .map(|defs| defs.keys().cloned().collect())
            .unwrap_or_default(),
        raw: swagger.clone(),
    };

    Ok(Connector {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::Connector,
        entity_id: connector_id.to_string(),
        display_name: Some(connector_id.to_string()),
        api_name: connector_id.to_string(),
        environment_id: environment_id.to_string(),
        spec,
        version: string_field(&swagger["info"], "version")?,
        created_at: timestamp_field(properties, "createdTime")?,
        last_modified_at: timestamp_field(properties, "changedTime")?,
        created_by: properties
            .get("publisher")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        raw_payload: raw.clone(),
    })
}

fn principal_of(rbac: &Value) -> Option<&Value> {
    rbac.get("properties").and_then(|p| p.get("principal"))
}

fn parse_principal(raw: &Value) -> Principal {
    let id = raw
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Principal {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::Principal,
        entity_id: id.clone(),
        display_name: raw
            .get("displayName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        principal_id: id,
        principal_type: raw
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        tenant_id: raw
            .get("tenantId")
            .and_then(|v| v.as_str())
            .unwrap_or("N/A")
            .to_string(),
        email: raw.get("email").and_then(|v| v.as_str()).map(str::to_string),
        upn: raw
            .get("userPrincipalName")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        raw_payload: raw.clone(),
    }
}

/// Tenant-wide grants carry no user identity; the tenant id stands in for
/// every identity field.
fn parse_tenant_principal(principal: &Value, rbac: &Value) -> Principal {
    let tenant_id = principal
        .get("tenantId")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Principal {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::Principal,
        entity_id: tenant_id.clone(),
        display_name: Some(tenant_id.clone()),
        principal_id: tenant_id.clone(),
        principal_type: "Tenant".to_string(),
        tenant_id,
        email: None,
        upn: None,
        raw_payload: rbac.clone(),
    }
}

fn parse_principal_with_raw(principal: &Value, rbac: &Value) -> Principal {
    let mut parsed = parse_principal(principal);
    parsed.upn = principal
        .get("email")
        .and_then(|v| v.as_str())
        .map(str::to_string);
    parsed.raw_payload = rbac.clone();
    parsed
}

fn string_field(value: &Value, field: &str) -> Result<String> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ConnSurveyorError::invalid_response(format!("Missing string field '{field}'"))
        })
}

fn timestamp_field(value: &Value, field: &str) -> Result<DateTime<Utc>> {
    let raw = value.get(field).and_then(|v| v.as_str()).ok_or_else(|| {
        ConnSurveyorError::invalid_response(format!("Missing timestamp field '{field}'"))
    })?;
    parse_timestamp(raw)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            ConnSurveyorError::invalid_response(format!("Unparseable timestamp '{raw}'"))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_connection(api_id: &str, status: &str, allow_sharing: bool) -> Value {
        json!({
            "name": "c1",
            "properties": {
                "apiId": api_id,
                "displayName": "conn",
                "statuses": [{"status": status}],
                "allowSharing": allow_sharing,
                "environment": {
                    "id": "/providers/Microsoft.PowerApps/environments/default-e1",
                    "name": "default-e1"
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
                "connectionParameters": {"vaultName": "corp-vault"},
            }
        })
    }

    #[test]
    fn test_filter_keeps_connected_shareable() {
        let raw = raw_connection(
            "/providers/Microsoft.PowerApps/apis/shared_keyvault",
            "Connected",
            true,
        );
        assert!(should_keep_connection(&raw));
    }

    #[test]
    fn test_filter_drops_disconnected_or_unshareable() {
        let disconnected = raw_connection(
            "/providers/Microsoft.PowerApps/apis/shared_keyvault",
            "Error",
            true,
        );
        assert!(!should_keep_connection(&disconnected));

        let unshareable = raw_connection(
            "/providers/Microsoft.PowerApps/apis/shared_keyvault",
            "Connected",
            false,
        );
        assert!(!should_keep_connection(&unshareable));
    }

    #[test]
    fn test_filter_always_keeps_logic_flows() {
        let flow = raw_connection(
            "/providers/Microsoft.PowerApps/apis/shared_logicflows",
            "Error",
            false,
        );
        assert!(should_keep_connection(&flow));
    }

    #[test]
    fn test_parse_connection_normalizes_environment() {
        let raw = raw_connection(
            "/providers/Microsoft.PowerApps/apis/shared_keyvault",
            "Connected",
            true,
        );
        let connection = parse_connection(&raw).unwrap();
        assert_eq!(connection.environment_id, "Default-e1");
        assert_eq!(connection.connector_id, "shared_keyvault");
        assert_eq!(connection.api_name(), "shared_keyvault");
        assert!(connection.is_valid);
        assert_eq!(
            connection.connection_parameters["vaultName"],
            json!("corp-vault")
        );
        assert_eq!(
            connection.connection_parameters["accountName"],
            json!("alice@contoso.com")
        );
    }

    #[test]
    fn test_parse_connector_injects_bearer_scheme() {
        let raw = json!({
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
        });
        let connector = parse_connector(&raw, "shared_keyvault", "Default-e1").unwrap();
        assert!(connector
            .spec
            .security_schemes
            .contains(&SPEC_BEARER_SCHEME.to_string()));
        assert_eq!(
            connector.spec.raw["securityDefinitions"][SPEC_BEARER_SCHEME]["in"],
            json!("header")
        );
        assert_eq!(
            connector.spec.raw["security"],
            json!([{SPEC_BEARER_SCHEME: []}])
        );
        assert_eq!(connector.version, "1.0");
    }
}
