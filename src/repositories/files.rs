use crate::models::files::{NewStoredFile, StoredFile};
use crate::models::like_pattern;
use crate::models::pagination::Page;

use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct FileRepository {
    conn: PgPool,
}

impl FileRepository {
    pub fn new(conn: PgPool) -> Self {
        FileRepository { conn }
    }

    pub async fn insert_file(&self, file: NewStoredFile) -> Result<StoredFile, anyhow::Error> {
        let file_id = Uuid::new_v4().hyphenated().to_string();

        let file = sqlx::query_as::<_, StoredFile>(
            r#"
                INSERT INTO files (id, original_name, storage_key, url, mimetype, size, uploaded_by, chat_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
            "#,
        )
        .bind(file_id)
        .bind(file.original_name)
        .bind(file.storage_key)
        .bind(file.url)
        .bind(file.mimetype)
        .bind(file.size)
        .bind(file.uploaded_by)
        .bind(file.chat_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(file)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<StoredFile>, anyhow::Error> {
        let file = sqlx::query_as::<_, StoredFile>("SELECT * FROM files WHERE id = $1")
            .bind(file_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(file)
    }

    pub async fn get_chat_files(
        &self,
        chat_id: &str,
        mime_filter: Option<&str>,
        page: Page,
    ) -> Result<(Vec<StoredFile>, i64), anyhow::Error> {
        let pattern = like_pattern(mime_filter.map(str::trim).unwrap_or_default());

        let files = sqlx::query_as::<_, StoredFile>(
            r#"SELECT * FROM files WHERE chat_id = $1 AND mimetype ILIKE $2
            ORDER BY created_at DESC LIMIT $3 OFFSET $4"#,
        )
        .bind(chat_id)
        .bind(&pattern)
        .bind(page.limit)
        .bind(page.offset())
        .fetch_all(&self.conn)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM files WHERE chat_id = $1 AND mimetype ILIKE $2",
        )
        .bind(chat_id)
        .bind(&pattern)
        .fetch_one(&self.conn)
        .await?;

        Ok((files, total))
    }
}
