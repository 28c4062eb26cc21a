//! Mailbox backend.
//!
//! The proxied mail API exposes no cursor over a mailbox, only a
//! "last received matching filters" lookup. Enumeration therefore walks
//! the full cross-product of label x attachment-presence x importance x
//! starred filters, and within one filter combination pages by growing an
//! exclude-subject refinement until the lookup stops matching. The same
//! email is reachable through many combinations, so records are
//! deduplicated by the stable email id.

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Method;

use crate::error::{ConnSurveyorError, Result};
use crate::models::{
    DataDump, DataRecord, DataRecordWithContext, DataStore, DataStoreWithContext, RecordExtra,
    RecordType, StoreExtra,
};
use crate::transport::ApiClient;

use super::{str_param, ConnectorClient};

pub struct GmailConnector {
    client: ApiClient,
    root: String,
}

impl GmailConnector {
    pub fn new(client: ApiClient, root: String) -> Self {
        Self { client, root }
    }
}

/// Extracts a file extension from an attachment content-type header of the
/// shape `application/pdf; name="report.pdf"`.
pub(crate) fn attachment_extension(content_type: &str) -> Option<String> {
    let (_, name) = content_type.split_once("name=\"")?;
    let name = name.split('"').next()?;
    let (_, extension) = name.rsplit_once('.')?;
    if extension.is_empty() {
        None
    } else {
        Some(extension.to_string())
    }
}

#[async_trait]
impl ConnectorClient for GmailConnector {
    fn api_name(&self) -> &'static str {
        "shared_gmail"
    }

    async fn ping(&self, connection_parameters: &serde_json::Value) -> Result<Vec<DataStore>> {
        let reachable = self
            .client
            .request_and_verify(
                Method::GET,
                &format!("{}/TestConnection", self.root),
                &[],
                "200",
                true,
            )
            .await?
            .success;
        if !reachable {
            return Ok(Vec::new());
        }

        let Some(account) = str_param(connection_parameters, "accountName") else {
            return Ok(Vec::new());
        };

        // Tenant falls out of the account's mail domain.
        Ok(vec![DataStore::new(
            account,
            None,
            None,
            "https://gmail.googleapis.com/",
            None,
            StoreExtra::None,
        )])
    }

    async fn enum_records(&self, _store: &DataStoreWithContext) -> Result<Vec<DataRecord>> {
        let mut records = Vec::new();
        let mut seen_email_ids: HashSet<String> = HashSet::new();

        let labels_response = self
            .client
            .request_and_verify(
                Method::GET,
                &format!("{}/Mail/Labels", self.root),
                &[],
                "200",
                true,
            )
            .await?;
        if !labels_response.success {
            return Ok(records);
        }
        let labels = labels_response
            .body
            .json()
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for label in &labels {
            let Some(label_id) = label.get("Id").and_then(|v| v.as_str()) else {
                continue;
            };

            for with_attachments in [true, false] {
                for importance in ["Important", "Not important"] {
                    for starred in ["Starred", "Not starred"] {
                        self.enum_filter_combination(
                            label_id,
                            with_attachments,
                            importance,
                            starred,
                            &mut seen_email_ids,
                            &mut records,
                        )
                        .await?;
                    }
                }
            }
        }

        Ok(records)
    }

    async fn dump(&self, record: &DataRecordWithContext) -> Result<DataDump> {
        let data = &record.record;
        let fetch_error =
            || ConnSurveyorError::record_fetch(self.api_name(), data.record_type, &data.record_id);

        let url = super::join_url(&self.root, &["Mail", &data.record_id])?;
        match &data.extra {
            RecordExtra::Email { is_html } => {
                let response = self
                    .client
                    .request_and_verify(
                        Method::GET,
                        &url,
                        &[("includeAttachments".to_string(), "false".to_string())],
                        "200",
                        true,
                    )
                    .await?;
                let body = response
                    .body
                    .json()
                    .and_then(|v| v.get("Body"))
                    .and_then(|v| v.as_str())
                    .filter(|_| response.success)
                    .ok_or_else(fetch_error)?;

                let extension = if *is_html { "html" } else { "txt" };
                Ok(DataDump::text(extension, body.as_bytes().to_vec()))
            }
            RecordExtra::Attachment { content_type } => {
                let response = self
                    .client
                    .request_and_verify(
                        Method::GET,
                        &url,
                        &[("includeAttachments".to_string(), "true".to_string())],
                        "200",
                        true,
                    )
                    .await?;
                let attachments = response
                    .body
                    .json()
                    .and_then(|v| v.get("Attachments"))
                    .and_then(|v| v.as_array())
                    .filter(|_| response.success)
                    .ok_or_else(fetch_error)?;

                let wanted = data.record_name.as_deref().unwrap_or_default();
                let content = attachments
                    .iter()
                    .find(|a| a.get("Name").and_then(|n| n.as_str()) == Some(wanted))
                    .and_then(|a| a.get("ContentBytes"))
                    .and_then(|c| c.as_str())
                    .ok_or_else(fetch_error)?;

                let extension =
                    attachment_extension(content_type).unwrap_or_else(|| "dat".to_string());
                // Content stays base64 until the writer decides how to
                // materialize it; absent encoding marks it binary.
                Ok(DataDump::binary(extension, content.as_bytes().to_vec()))
            }
            _ => Err(fetch_error()),
        }
    }
}

impl GmailConnector {
    /// Enumerates one filter combination, growing the exclude-subject query
    /// until the lookup stops matching.
    async fn enum_filter_combination(
        &self,
        label_id: &str,
        with_attachments: bool,
        importance: &str,
        starred: &str,
        seen_email_ids: &mut HashSet<String>,
        records: &mut Vec<DataRecord>,
    ) -> Result<()> {
        let mut exclude_subjects = String::new();

        loop {
            let query = vec![
                ("label".to_string(), label_id.to_string()),
                ("importance".to_string(), importance.to_string()),
                ("starred".to_string(), starred.to_string()),
                (
                    "fetchOnlyWithAttachments".to_string(),
                    with_attachments.to_string(),
                ),
                ("includeAttachments".to_string(), "true".to_string()),
                ("subject".to_string(), exclude_subjects.clone()),
            ];

            let response = self
                .client
                .request_and_verify(
                    Method::GET,
                    &format!("{}/Mail/LastReceived", self.root),
                    &query,
                    "200",
                    true,
                )
                .await?;
            if !response.success {
                return Ok(());
            }
            let Some(email) = response.body.json() else {
                return Ok(());
            };
            let Some(email_id) = email.get("Id").and_then(|v| v.as_str()) else {
                return Ok(());
            };
            let subject = email.get("Subject").and_then(|v| v.as_str()).unwrap_or("");

            if seen_email_ids.insert(email_id.to_string()) {
                records.push(DataRecord {
                    record_type: RecordType::Email,
                    record_id: email_id.to_string(),
                    record_name: Some(subject.to_string()),
                    extra: RecordExtra::Email {
                        is_html: email
                            .get("IsHtml")
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false),
                    },
                });

                let attachments = email
                    .get("Attachments")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();
                for attachment in &attachments {
                    let Some(name) = attachment.get("Name").and_then(|v| v.as_str()) else {
                        continue;
                    };
                    records.push(DataRecord {
                        record_type: RecordType::Attachment,
                        record_id: email_id.to_string(),
                        record_name: Some(name.to_string()),
                        extra: RecordExtra::Attachment {
                            content_type: attachment
                                .get("ContentType")
                                .and_then(|v| v.as_str())
                                .unwrap_or_default()
                                .to_string(),
                        },
                    });
                }
            }

            // Refine the query past this subject, whether or not the email
            // was new; identical subjects would otherwise pin the loop.
            exclude_subjects.push_str(&format!(" -{subject}"));
        }
    }
}
