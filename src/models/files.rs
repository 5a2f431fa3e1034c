use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pagination::lenient_i64_opt;

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct StoredFile {
    pub id: String,
    pub original_name: String,
    pub storage_key: String,
    pub url: String,
    pub mimetype: String,
    pub size: i64,
    pub uploaded_by: String,
    pub chat_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct NewStoredFile {
    pub original_name: String,
    pub storage_key: String,
    pub url: String,
    pub mimetype: String,
    pub size: i64,
    pub uploaded_by: String,
    pub chat_id: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFilesQuery {
    #[serde(rename = "type")]
    pub mime_filter: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub page: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64_opt")]
    pub limit: Option<i64>,
}

impl ChatFilesQuery {
    pub const DEFAULT_LIMIT: i64 = 20;
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatFilesPage {
    pub files: Vec<StoredFile>,
    pub total: i64,
    pub page: i64,
    pub total_pages: i64,
}

/// Raw object served back to the client.
#[derive(Clone, Debug)]
pub struct FileContent {
    pub file: StoredFile,
    pub bytes: Vec<u8>,
}
