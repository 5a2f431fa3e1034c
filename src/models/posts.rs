use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;

use super::lenient_f64_opt;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct GeoPoint {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[longitude, latitude]`, GeoJSON order.
    pub coordinates: [f64; 2],
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: [longitude, latitude],
        }
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates[0]
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates[1]
    }
}

/// Listing attributes. Location and media are typed; everything else the
/// listing form sends (price, category, brand, documents...) stays in
/// `attributes` and round-trips untouched.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PostData {
    #[serde(default, deserialize_with = "lenient_f64_opt", skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64_opt", skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub post_image: Vec<String>,
    #[serde(default)]
    pub s3_keys: Vec<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl PostData {
    /// Moves `lat`/`lng` into the GeoJSON `location` and checks ranges.
    pub fn normalize_location(&mut self) -> Result<(), String> {
        if let (Some(lat), Some(lng)) = (self.lat, self.lng) {
            self.location = Some(GeoPoint::new(lat, lng));
        }

        if let Some(location) = &self.location {
            if location.kind != "Point" {
                return Err(format!("unsupported location type {}", location.kind));
            }
            let (lat, lng) = (location.latitude(), location.longitude());
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
                return Err(format!("coordinates out of range: {lat}, {lng}"));
            }
        }

        Ok(())
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.location
            .as_ref()
            .map(|point| (point.latitude(), point.longitude()))
    }
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub created_by: String,
    pub post_data: Json<PostData>,
    pub is_submit: Option<bool>,
    pub step: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PostListing {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub post: Post,
    /// Metres from the search origin, present for geo searches only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[sqlx(skip)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_owner: Option<bool>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub post_data: Option<PostData>,
    pub is_submit: Option<bool>,
    pub step: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    pub post_id: Option<String>,
    pub post_data: Option<PostData>,
    pub is_submit: Option<bool>,
    pub step: Option<Value>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveImageRequest {
    pub post_id: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFilter {
    pub item_name: Option<String>,
    pub brand: Option<String>,
    pub city: Option<String>,
    pub pincode: Option<Value>,
    pub subcategory: Option<Value>,
    pub category: Option<Value>,
    pub item_type: Option<Value>,
    #[serde(default)]
    pub available_today: bool,
    #[serde(default)]
    pub per_hour: bool,
    #[serde(default)]
    pub per_day: bool,
    #[serde(default)]
    pub per_week: bool,
    #[serde(default)]
    pub per_month: bool,
    #[serde(default)]
    pub with_images: bool,
    #[serde(default)]
    pub with_videos: bool,
    #[serde(default)]
    pub id_proofs: Vec<String>,
    #[serde(default, deserialize_with = "lenient_f64_opt")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64_opt")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64_opt")]
    pub max_distance_km: Option<f64>,
}

impl PostFilter {
    /// Price unit selected by the per-period toggles; the longest one wins
    /// when several are set.
    pub fn price_unit(&self) -> Option<&'static str> {
        if self.per_month {
            Some("month")
        } else if self.per_week {
            Some("week")
        } else if self.per_day {
            Some("day")
        } else if self.per_hour {
            Some("hour")
        } else {
            None
        }
    }

    pub fn origin(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some((lat, lng)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostSearchRequest {
    #[serde(default)]
    pub filter_data: Option<PostFilter>,
}

/// A file received from a multipart request, before it reaches storage.
#[derive(Clone, Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub mimetype: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageUploadReport {
    pub message: String,
    pub uploaded_files: Vec<String>,
    pub total_images: usize,
    pub new_images_added: usize,
    pub post: Post,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub partial_success: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub upload_errors: Vec<String>,
}
