//! Gmail search and attachment download for lab PDF import.

use crate::models::User;
use crate::services::database::Database;
use crate::services::google::GoogleOAuthClient;
use crate::services::providers::http_client;
use crate::services::storage::safe_file_name;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::Value;
use service_core::error::AppError;
use uuid::Uuid;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const SEARCH_QUERY: &str =
    "has:attachment filename:pdf (resultados OR laboratorio OR examen OR hemograma OR analisis OR sangre)";
pub const MAX_RESULTS: u32 = 20;
const NO_SUBJECT: &str = "(sin asunto)";

#[derive(Debug, Clone, PartialEq)]
pub struct PdfAttachment {
    pub attachment_id: String,
    pub filename: String,
}

#[derive(Debug, Clone)]
pub struct LabEmail {
    pub message_id: String,
    pub subject: String,
    pub date: String,
    pub attachments: Vec<PdfAttachment>,
}

/// Google credentials of one user for the duration of an import. A refreshed
/// access token is written back to the user row.
pub struct GmailAuth {
    pub user_id: Uuid,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

impl GmailAuth {
    pub fn for_user(user: &User) -> Option<Self> {
        user.has_google_tokens().then(|| Self {
            user_id: user.id,
            access_token: user.google_access_token.clone(),
            refresh_token: user.google_refresh_token.clone(),
        })
    }
}

#[derive(Clone)]
pub struct GmailClient {
    client: reqwest::Client,
    google: GoogleOAuthClient,
    db: Database,
}

impl GmailClient {
    pub fn new(google: GoogleOAuthClient, db: Database) -> Self {
        Self {
            client: http_client(30),
            google,
            db,
        }
    }

    pub async fn search_lab_emails(&self, auth: &mut GmailAuth) -> Result<Vec<LabEmail>, AppError> {
        let max_results = MAX_RESULTS.to_string();
        let Some(listing) = self
            .get_json(
                "/messages",
                &[("q", SEARCH_QUERY), ("maxResults", max_results.as_str())],
                auth,
            )
            .await?
        else {
            return Ok(Vec::new());
        };

        let ids: Vec<String> = listing
            .get("messages")
            .and_then(Value::as_array)
            .map(|messages| {
                messages
                    .iter()
                    .filter_map(|m| m.get("id").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut found = Vec::new();
        for id in ids {
            let Some(message) = self.get_json(&format!("/messages/{}", id), &[], auth).await? else {
                continue;
            };
            let payload = message.get("payload").cloned().unwrap_or(Value::Null);
            let attachments = find_pdf_attachments(&payload);
            if attachments.is_empty() {
                continue;
            }

            found.push(LabEmail {
                subject: header_value(&payload, "subject").unwrap_or_else(|| NO_SUBJECT.to_string()),
                date: header_value(&payload, "date").unwrap_or_default(),
                message_id: id,
                attachments,
            });
        }

        tracing::info!(user_id = %auth.user_id, found = found.len(), "Gmail search complete");
        Ok(found)
    }

    pub async fn download_attachment(
        &self,
        auth: &mut GmailAuth,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<Option<Vec<u8>>, AppError> {
        let path = format!("/messages/{}/attachments/{}", message_id, attachment_id);
        let data = self.get_json(&path, &[], auth).await?;

        Ok(data
            .as_ref()
            .and_then(|d| d.get("data"))
            .and_then(Value::as_str)
            .and_then(decode_attachment_data))
    }

    /// GET `/users/me{path}`. Refreshes the access token once on 401. Any
    /// other failure yields `None`.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        auth: &mut GmailAuth,
    ) -> Result<Option<Value>, AppError> {
        let token = match auth.access_token.clone() {
            Some(token) => token,
            None => match self.refresh(auth).await? {
                Some(token) => token,
                None => return Ok(None),
            },
        };

        let mut response = self.send(path, query, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let Some(token) = self.refresh(auth).await? else {
                return Ok(None);
            };
            response = self.send(path, query, &token).await?;
        }

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), path, "Gmail request failed");
            return Ok(None);
        }

        Ok(response.json::<Value>().await.ok())
    }

    async fn send(
        &self,
        path: &str,
        query: &[(&str, &str)],
        token: &str,
    ) -> Result<reqwest::Response, AppError> {
        self.client
            .get(format!("{}/users/me{}", GMAIL_API_BASE, path))
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::BadGateway(format!("Gmail request failed: {}", e)))
    }

    async fn refresh(&self, auth: &mut GmailAuth) -> Result<Option<String>, AppError> {
        let Some(refresh_token) = auth.refresh_token.clone() else {
            return Ok(None);
        };

        match self.google.refresh(&refresh_token).await {
            Ok(tokens) => {
                self.db
                    .set_google_access_token(auth.user_id, &tokens.access_token)
                    .await?;
                auth.access_token = Some(tokens.access_token.clone());
                Ok(Some(tokens.access_token))
            }
            Err(e) => {
                tracing::error!(user_id = %auth.user_id, error = %e, "Google token refresh failed");
                Ok(None)
            }
        }
    }
}

/// Every part whose filename ends in `.pdf` and has an attachment id, depth first.
pub fn find_pdf_attachments(part: &Value) -> Vec<PdfAttachment> {
    let mut found = Vec::new();
    collect_pdf_parts(part, &mut found);
    found
}

fn collect_pdf_parts(part: &Value, found: &mut Vec<PdfAttachment>) {
    let filename = part.get("filename").and_then(Value::as_str).unwrap_or("");
    let attachment_id = part
        .get("body")
        .and_then(|b| b.get("attachmentId"))
        .and_then(Value::as_str);

    if let Some(attachment_id) = attachment_id {
        if filename.to_lowercase().ends_with(".pdf") {
            found.push(PdfAttachment {
                attachment_id: attachment_id.to_string(),
                filename: filename.to_string(),
            });
        }
    }

    if let Some(parts) = part.get("parts").and_then(Value::as_array) {
        for sub in parts {
            collect_pdf_parts(sub, found);
        }
    }
}

fn header_value(payload: &Value, name: &str) -> Option<String> {
    payload
        .get("headers")?
        .as_array()?
        .iter()
        .find(|h| {
            h.get("name")
                .and_then(Value::as_str)
                .is_some_and(|n| n.eq_ignore_ascii_case(name))
        })
        .and_then(|h| h.get("value"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Storage key for an imported attachment. The message id keeps same-named
/// attachments from different emails apart.
pub fn import_storage_key(user_id: Uuid, message_id: &str, filename: &str) -> String {
    format!(
        "gmail-import/{}/{}-{}",
        user_id,
        safe_file_name(message_id),
        safe_file_name(filename)
    )
}

/// Gmail attachment bodies are base64url, with or without padding.
pub fn decode_attachment_data(data: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_find_nested_pdf_attachments() {
        let payload = json!({
            "filename": "",
            "parts": [
                {"filename": "", "mimeType": "multipart/alternative", "parts": [
                    {"filename": "", "body": {"size": 10}}
                ]},
                {"filename": "Resultados.PDF", "body": {"attachmentId": "att-1"}},
                {"filename": "foto.jpg", "body": {"attachmentId": "att-2"}},
                {"filename": "mixed", "parts": [
                    {"filename": "hemograma.pdf", "body": {"attachmentId": "att-3"}},
                    {"filename": "sin-id.pdf", "body": {}}
                ]}
            ]
        });

        let found = find_pdf_attachments(&payload);
        assert_eq!(
            found,
            vec![
                PdfAttachment {
                    attachment_id: "att-1".into(),
                    filename: "Resultados.PDF".into()
                },
                PdfAttachment {
                    attachment_id: "att-3".into(),
                    filename: "hemograma.pdf".into()
                },
            ]
        );
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let payload = json!({"headers": [
            {"name": "Subject", "value": "Sus resultados"},
            {"name": "DATE", "value": "Mon, 3 Mar 2025 10:00:00 -0500"}
        ]});
        assert_eq!(header_value(&payload, "subject").as_deref(), Some("Sus resultados"));
        assert!(header_value(&payload, "date").is_some());
        assert!(header_value(&json!({}), "subject").is_none());
    }

    #[test]
    fn test_import_keys_differ_per_message() {
        let user_id = Uuid::new_v4();
        let first = import_storage_key(user_id, "18c1a", "resultados.pdf");
        let second = import_storage_key(user_id, "18c2b", "resultados.pdf");

        assert_ne!(first, second);
        assert_eq!(
            first,
            format!("gmail-import/{}/18c1a-resultados.pdf", user_id)
        );
        assert_eq!(
            import_storage_key(user_id, "m1", "../../etc/passwd"),
            format!("gmail-import/{}/m1-passwd", user_id)
        );
    }

    #[test]
    fn test_decode_attachment_data() {
        let encoded = URL_SAFE_NO_PAD.encode(b"%PDF-1.4\xff\xfe");
        assert_eq!(decode_attachment_data(&encoded).unwrap(), b"%PDF-1.4\xff\xfe");
        assert_eq!(decode_attachment_data("JVBERg==").unwrap(), b"%PDF");
        assert!(decode_attachment_data("not base64!").is_none());
    }
}
