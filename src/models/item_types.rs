use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ItemType {
    pub id: i32,
    pub name: String,
    pub category_id: String,
    pub sub_category_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateItemTypeRequest {
    pub name: Option<String>,
    pub category_id: Option<serde_json::Value>,
    pub sub_category_id: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemTypeQuery {
    pub sub_category_id: Option<String>,
}

/// Category references arrive as numbers or strings; both are stored as text.
pub fn reference_id(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_ids_accept_numbers_and_strings() {
        assert_eq!(reference_id(Some(&json!(4))), Some("4".to_string()));
        assert_eq!(reference_id(Some(&json!(" 12 "))), Some("12".to_string()));
        assert_eq!(reference_id(Some(&json!(""))), None);
        assert_eq!(reference_id(None), None);
    }
}
