//! Connector backend tests against in-process stub servers.
//!
//! Exercises the behaviors a live tenant cannot be trusted to reproduce:
//! the stack-based folder walk finding deep leaves, and the mailbox
//! filter cross-product never emitting the same email twice.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use connsurveyor_core::connectors::bind;
use connsurveyor_core::models::{
    Connector, ConnectorSpec, RecordExtra, RecordType, ResourceType, SCHEMA_VERSION,
};
use connsurveyor_core::transport::ApiClient;
use serde_json::{json, Value};

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

/// A connector entity whose specification points at the stub server.
fn stub_connector(api_name: &str, base: &str, base_path: &str) -> Connector {
    Connector {
        schema_version: SCHEMA_VERSION.to_string(),
        entity_type: ResourceType::Connector,
        entity_id: api_name.to_string(),
        display_name: Some(api_name.to_string()),
        api_name: api_name.to_string(),
        environment_id: "Default-e1".to_string(),
        spec: ConnectorSpec {
            host: base.to_string(),
            base_path: base_path.to_string(),
            security_schemes: vec!["ApiHubBearerAuth".to_string()],
            raw: json!({"host": base, "basePath": base_path}),
        },
        version: "1.0".to_string(),
        created_at: Utc::now(),
        last_modified_at: Utc::now(),
        created_by: "publisher".to_string(),
        raw_payload: Value::Null,
    }
}

fn client() -> ApiClient {
    ApiClient::new("Bearer stub-token").unwrap()
}

#[tokio::test]
async fn test_blob_stack_walk_discovers_nested_leaf() {
    // root/invoices/2024/jan.csv: the leaf sits three folders deep and
    // must fall out of the explicit stack walk.
    let router = Router::new()
        .route("/apim/azureblob/c1/testconnection", get(|| async { Json(json!({})) }))
        .route(
            "/apim/azureblob/c1/v2/datasets/corpsa/foldersV2",
            get(|| async {
                Json(json!({"value": [
                    {"Id": "fld-root", "Name": "root", "DisplayName": "root", "IsFolder": true}
                ]}))
            }),
        )
        .route(
            "/apim/azureblob/c1/v2/datasets/corpsa/foldersV2/{folder}",
            get(|Path(folder): Path<String>| async move {
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
            "/apim/azureblob/c1/v2/datasets/corpsa/files/file-jan/content",
            get(|| async { "month,total\njan,1200" }),
        );
    let base = serve(router).await;

    let connector = bind(
        client(),
        &stub_connector("shared_azureblob", &base, "/apim/azureblob"),
        "c1",
    )
    .unwrap();

    let params = json!({
        "name": "keyBasedAuth",
        "values": {"accountName": {"value": "corpsa"}}
    });
    let stores = connector.ping(&params).await.unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].store.name.as_deref(), Some("root"));

    let records = connector.enum_records(&stores[0]).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.record.record_type, RecordType::File);
    assert_eq!(record.record.record_name.as_deref(), Some("jan.csv"));
    assert_eq!(
        record.record.extra,
        RecordExtra::File {
            path: "/root/invoices/2024/jan.csv".to_string(),
            media_type: "text/csv".to_string(),
        }
    );

    let dump = connector.dump(record).await.unwrap();
    assert_eq!(dump.dump.extension, "csv");
    assert_eq!(dump.dump.content, b"month,total\njan,1200");
}

#[tokio::test]
async fn test_blob_wrong_auth_variant_pings_empty() {
    // No stub routes needed: the auth gate rejects before any request.
    let base = serve(Router::new()).await;
    let connector = bind(
        client(),
        &stub_connector("shared_azureblob", &base, "/apim/azureblob"),
        "c1",
    )
    .unwrap();

    let params = json!({"name": "oauthAuthentication"});
    let stores = connector.ping(&params).await.unwrap();
    assert!(stores.is_empty());
}

#[tokio::test]
async fn test_gmail_overlapping_filters_dedup_by_email_id() {
    // Every filter combination matches the same single email; the
    // subject-exclusion refinement then stops matching. The email and its
    // attachment must each be emitted exactly once.
    let router = Router::new()
        .route("/apim/gmail/c1/TestConnection", get(|| async { Json(json!({})) }))
        .route(
            "/apim/gmail/c1/Mail/Labels",
            get(|| async { Json(json!([{"Id": "INBOX"}])) }),
        )
        .route(
            "/apim/gmail/c1/Mail/LastReceived",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                if query.get("subject").is_none_or(|s| s.is_empty()) {
                    (
                        StatusCode::OK,
                        Json(json!({
                            "Id": "mail-1",
                            "Subject": "Quarterly numbers",
                            "IsHtml": false,
                            "Attachments": [{
                                "Name": "q1.xlsx",
                                "ContentType": "application/vnd.ms-excel; name=\"q1.xlsx\"",
                                "ContentBytes": "ZmFrZQ=="
                            }]
                        })),
                    )
                } else {
                    // The exclude-subject refinement filtered it out.
                    (StatusCode::NOT_FOUND, Json(json!({})))
                }
            }),
        );
    let base = serve(router).await;

    let connector = bind(
        client(),
        &stub_connector("shared_gmail", &base, "/apim/gmail"),
        "c1",
    )
    .unwrap();

    let stores = connector
        .ping(&json!({"accountName": "alice@contoso.com"}))
        .await
        .unwrap();
    assert_eq!(stores.len(), 1);
    assert_eq!(stores[0].store.tenant.as_deref(), Some("contoso.com"));

    let records = connector.enum_records(&stores[0]).await.unwrap();

    let email_ids: Vec<&str> = records
        .iter()
        .filter(|r| r.record.record_type == RecordType::Email)
        .map(|r| r.record.record_id.as_str())
        .collect();
    assert_eq!(email_ids, vec!["mail-1"]);

    let attachments: Vec<&str> = records
        .iter()
        .filter(|r| r.record.record_type == RecordType::Attachment)
        .filter_map(|r| r.record.record_name.as_deref())
        .collect();
    assert_eq!(attachments, vec!["q1.xlsx"]);
}

#[tokio::test]
async fn test_gmail_email_dump_picks_extension_from_metadata() {
    let router = Router::new().route(
        "/apim/gmail/c1/Mail/{id}",
        get(|Path(id): Path<String>| async move {
            Json(json!({
                "Id": id,
                "Body": "<p>see attached</p>",
                "Attachments": []
            }))
        }),
    );
    let base = serve(router).await;

    let connector = bind(
        client(),
        &stub_connector("shared_gmail", &base, "/apim/gmail"),
        "c1",
    )
    .unwrap();

    let stores = vec![connsurveyor_core::models::DataStoreWithContext {
        api_name: "shared_gmail".to_string(),
        connection_id: "c1".to_string(),
        store: connsurveyor_core::models::DataStore::new(
            "alice@contoso.com",
            None,
            None,
            "https://gmail.googleapis.com/",
            None,
            connsurveyor_core::models::StoreExtra::None,
        ),
    }];

    let record = connsurveyor_core::models::DataRecordWithContext {
        store: stores[0].clone(),
        record: connsurveyor_core::models::DataRecord {
            record_type: RecordType::Email,
            record_id: "mail-1".to_string(),
            record_name: Some("Quarterly numbers".to_string()),
            extra: RecordExtra::Email { is_html: true },
        },
    };

    let dump = connector.dump(&record).await.unwrap();
    assert_eq!(dump.dump.extension, "html");
    assert_eq!(dump.dump.encoding.as_deref(), Some("utf-8"));
    assert_eq!(dump.dump.content, b"<p>see attached</p>");
}

#[tokio::test]
async fn test_keyvault_key_dump_is_record_scoped_failure() {
    let base = serve(Router::new()).await;
    let connector = bind(
        client(),
        &stub_connector("shared_keyvault", &base, "/apim/keyvault"),
        "c1",
    )
    .unwrap();

    let record = connsurveyor_core::models::DataRecordWithContext {
        store: connsurveyor_core::models::DataStoreWithContext {
            api_name: "shared_keyvault".to_string(),
            connection_id: "c1".to_string(),
            store: connsurveyor_core::models::DataStore::new(
                "svc",
                None,
                None,
                "https://corp-vault.vault.azure.net/",
                Some("corp-vault".to_string()),
                connsurveyor_core::models::StoreExtra::None,
            ),
        },
        record: connsurveyor_core::models::DataRecord {
            record_type: RecordType::Key,
            record_id: "signing-key".to_string(),
            record_name: Some("signing-key".to_string()),
            extra: RecordExtra::None,
        },
    };

    let err = connector.dump(&record).await.unwrap_err();
    assert!(err.is_record_scoped());
}
