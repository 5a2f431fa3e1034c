use crate::models::like_pattern;
use crate::models::posts::{Post, PostData, PostFilter, PostListing};

use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

/// Great-circle distance in metres between the stored coordinates and the
/// bound origin (`$lat`, `$lng`, in that push order).
const HAVERSINE: [&str; 3] = [
    "6371000.0 * 2 * asin(sqrt(power(sin(radians(p.latitude - ",
    ") / 2), 2) + cos(radians(p.latitude)) * cos(radians(",
    ")) * power(sin(radians(p.longitude - ",
];

#[derive(Clone)]
pub struct PostRepository {
    conn: PgPool,
}

impl PostRepository {
    pub fn new(conn: PgPool) -> Self {
        Self { conn }
    }

    pub async fn insert_post(
        &self,
        created_by: &str,
        data: PostData,
        is_submit: Option<bool>,
        step: Option<Value>,
    ) -> Result<Post, anyhow::Error> {
        let post_id = Uuid::new_v4().hyphenated().to_string();
        let (latitude, longitude) = data.coordinates().unzip();

        let post = sqlx::query_as::<_, Post>(
            r#"
                INSERT INTO posts (id, created_by, post_data, latitude, longitude, is_submit, step)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, created_by, post_data, is_submit, step, created_at, updated_at
            "#,
        )
        .bind(post_id)
        .bind(created_by)
        .bind(Json(data))
        .bind(latitude)
        .bind(longitude)
        .bind(is_submit)
        .bind(step.map(Json))
        .fetch_one(&self.conn)
        .await?;

        Ok(post)
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>, anyhow::Error> {
        let post = sqlx::query_as::<_, Post>(
            "SELECT id, created_by, post_data, is_submit, step, created_at, updated_at FROM posts WHERE id = $1",
        )
        .bind(post_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(post)
    }

    pub async fn get_posts(&self, post_ids: &[String]) -> Result<Vec<Post>, anyhow::Error> {
        if post_ids.is_empty() {
            return Ok(Vec::new());
        }

        let posts = sqlx::query_as::<_, Post>(
            "SELECT id, created_by, post_data, is_submit, step, created_at, updated_at FROM posts WHERE id = ANY($1)",
        )
        .bind(post_ids)
        .fetch_all(&self.conn)
        .await?;

        Ok(posts)
    }

    pub async fn get_posts_by_owner(&self, owner_id: &str) -> Result<Vec<Post>, anyhow::Error> {
        let posts = sqlx::query_as::<_, Post>(
            r#"SELECT id, created_by, post_data, is_submit, step, created_at, updated_at
            FROM posts WHERE created_by = $1 ORDER BY created_at DESC"#,
        )
        .bind(owner_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(posts)
    }

    /// Replaces the attribute bag. `is_submit`/`step` are only touched when
    /// given.
    pub async fn update_post(
        &self,
        post_id: &str,
        data: PostData,
        is_submit: Option<bool>,
        step: Option<Value>,
    ) -> Result<Option<Post>, anyhow::Error> {
        let (latitude, longitude) = data.coordinates().unzip();

        let post = sqlx::query_as::<_, Post>(
            r#"
                UPDATE posts SET
                    post_data = $2,
                    latitude = $3,
                    longitude = $4,
                    is_submit = COALESCE($5, is_submit),
                    step = COALESCE($6, step),
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1
                RETURNING id, created_by, post_data, is_submit, step, created_at, updated_at
            "#,
        )
        .bind(post_id)
        .bind(Json(data))
        .bind(latitude)
        .bind(longitude)
        .bind(is_submit)
        .bind(step.map(Json))
        .fetch_optional(&self.conn)
        .await?;

        Ok(post)
    }

    pub async fn delete_post(&self, post_id: &str) -> Result<bool, anyhow::Error> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id)
            .execute(&self.conn)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn count_bookings(&self, post_id: &str) -> Result<i64, anyhow::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM bookings WHERE post_id = $1")
            .bind(post_id)
            .fetch_one(&self.conn)
            .await?;

        Ok(count)
    }

    pub async fn search_posts(&self, filter: &PostFilter) -> Result<Vec<PostListing>, anyhow::Error> {
        let mut query: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT * FROM (SELECT p.id, p.created_by, p.post_data, p.is_submit, p.step, p.created_at, p.updated_at, ",
        );

        match filter.origin() {
            Some((lat, lng)) => {
                query.push(HAVERSINE[0]);
                query.push_bind(lat);
                query.push(HAVERSINE[1]);
                query.push_bind(lat);
                query.push(HAVERSINE[2]);
                query.push_bind(lng);
                query.push(") / 2), 2))) AS distance FROM posts p WHERE p.latitude IS NOT NULL");
            }
            None => {
                query.push("NULL::DOUBLE PRECISION AS distance FROM posts p WHERE TRUE");
            }
        }

        push_filter(&mut query, filter);
        query.push(") listing");

        if filter.origin().is_some() {
            if let Some(max_km) = filter.max_distance_km {
                query.push(" WHERE distance <= ");
                query.push_bind(max_km * 1000.0);
            }
            query.push(" ORDER BY distance ASC");
        } else {
            query.push(" ORDER BY created_at DESC");
        }

        let posts = query
            .build_query_as::<PostListing>()
            .fetch_all(&self.conn)
            .await?;

        Ok(posts)
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &PostFilter) {
    let substring = [
        ("itemName", &filter.item_name),
        ("brand", &filter.brand),
        ("city", &filter.city),
    ];
    for (key, value) in substring {
        if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            query.push(format!(" AND p.post_data->>'{key}' ILIKE "));
            query.push_bind(like_pattern(value));
        }
    }

    let exact = [
        ("pincode", &filter.pincode),
        ("subcategory", &filter.subcategory),
        ("category", &filter.category),
        ("itemType", &filter.item_type),
    ];
    for (key, value) in exact {
        if let Some(value) = value.as_ref().and_then(scalar_text) {
            query.push(format!(" AND p.post_data->>'{key}' = "));
            query.push_bind(value);
        }
    }

    if filter.available_today {
        query.push(" AND p.post_data->>'availability' = 'available'");
    }
    if let Some(unit) = filter.price_unit() {
        query.push(" AND p.post_data->>'priceUnit' = ");
        query.push_bind(unit);
    }
    if filter.with_images {
        query.push(" AND p.post_data->'postImage'->0 IS NOT NULL");
    }
    if filter.with_videos {
        query.push(" AND p.post_data->'postVideo'->0 IS NOT NULL");
    }
    if !filter.id_proofs.is_empty() {
        query.push(" AND p.post_data->'selectedDocuments' ?| ");
        query.push_bind(filter.id_proofs.clone());
    }
}
