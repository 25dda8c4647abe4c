use chrono::NaiveDateTime;
use serde_json::Number;

/// Newest report as published upstream. Ids grow with each publication.
/// Magnitude and depth keep the upstream number text (`5.0` stays `5.0`).
#[derive(Debug, Clone, PartialEq)]
pub struct EarthquakeReport {
    pub id: i64,
    pub origin_time: NaiveDateTime,
    pub magnitude: Number,
    pub depth_km: Number,
    pub epicenter: String,
    pub content: String,
    pub image_uri: Option<String>,
}
