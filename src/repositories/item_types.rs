use crate::models::item_types::ItemType;

use sqlx::PgPool;

#[derive(Clone)]
pub struct ItemTypeRepository {
    conn: PgPool,
}

impl ItemTypeRepository {
    pub fn new(conn: PgPool) -> Self {
        ItemTypeRepository { conn }
    }

    pub async fn insert_item_type(
        &self,
        name: &str,
        category_id: &str,
        sub_category_id: &str,
    ) -> Result<ItemType, anyhow::Error> {
        let item_type = sqlx::query_as::<_, ItemType>(
            r#"
                INSERT INTO item_types (name, category_id, sub_category_id)
                VALUES ($1, $2, $3)
                RETURNING *
            "#,
        )
        .bind(name)
        .bind(category_id)
        .bind(sub_category_id)
        .fetch_one(&self.conn)
        .await?;

        Ok(item_type)
    }

    pub async fn get_item_types(&self, sub_category_id: Option<&str>) -> Result<Vec<ItemType>, anyhow::Error> {
        let item_types = sqlx::query_as::<_, ItemType>(
            r#"SELECT * FROM item_types
            WHERE $1::TEXT IS NULL OR sub_category_id = $1
            ORDER BY id ASC"#,
        )
        .bind(sub_category_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(item_types)
    }
}
