use crate::models::teams::Team;

use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct TeamRepository {
    conn: PgPool,
}

impl TeamRepository {
    pub fn new(conn: PgPool) -> Self {
        TeamRepository { conn }
    }

    pub async fn get_teams_for_member(&self, user_id: &str) -> Result<Vec<Team>, anyhow::Error> {
        let teams = sqlx::query_as::<_, Team>(
            "SELECT * FROM teams WHERE $1 = ANY(members) ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.conn)
        .await?;

        Ok(teams)
    }

    pub async fn get_team(&self, team_id: &str) -> Result<Option<Team>, anyhow::Error> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE id = $1")
            .bind(team_id)
            .fetch_optional(&self.conn)
            .await?;

        Ok(team)
    }

    pub async fn insert_team(
        &self,
        name: &str,
        description: Option<&str>,
        created_by: &str,
        members: &[String],
        settings: Map<String, Value>,
    ) -> Result<Team, anyhow::Error> {
        let team_id = Uuid::new_v4().hyphenated().to_string();

        let team = sqlx::query_as::<_, Team>(
            r#"
                INSERT INTO teams (id, name, description, members, admins, created_by, settings)
                VALUES ($1, $2, $3, $4, ARRAY[$5], $5, $6)
                RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(name)
        .bind(description)
        .bind(members)
        .bind(created_by)
        .bind(Json(settings))
        .fetch_one(&self.conn)
        .await?;

        Ok(team)
    }

    /// Appends `member_id` unless already present.
    pub async fn add_member(&self, team_id: &str, member_id: &str) -> Result<Option<Team>, anyhow::Error> {
        let team = sqlx::query_as::<_, Team>(
            r#"
                UPDATE teams SET
                    members = CASE WHEN $2 = ANY(members) THEN members ELSE array_append(members, $2) END,
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1
                RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(member_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(team)
    }

    pub async fn remove_member(&self, team_id: &str, member_id: &str) -> Result<Option<Team>, anyhow::Error> {
        let team = sqlx::query_as::<_, Team>(
            r#"
                UPDATE teams SET
                    members = array_remove(members, $2),
                    admins = array_remove(admins, $2),
                    updated_at = CURRENT_TIMESTAMP
                WHERE id = $1
                RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(member_id)
        .fetch_optional(&self.conn)
        .await?;

        Ok(team)
    }
}
