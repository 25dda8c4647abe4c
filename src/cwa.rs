//! Central Weather Administration open-data client for the numbered
//! earthquake report dataset.

use chrono::NaiveDateTime;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Deserializer};
use serde_json::Number;

use crate::models::EarthquakeReport;

const ORIGIN_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream rejected the access key (status {0})")]
    Unauthorized(StatusCode),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

impl FetchError {
    /// True when the operator has to fix configuration before a rerun helps.
    pub fn is_configuration(&self) -> bool {
        matches!(self, FetchError::Unauthorized(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("malformed report envelope: {0}")]
pub struct ParseError(#[from] serde_json::Error);

#[derive(Debug, Deserialize)]
struct Envelope {
    success: String,
    records: Option<Records>,
}

#[derive(Debug, Deserialize)]
struct Records {
    #[serde(rename = "Earthquake", default)]
    earthquake: Vec<ReportRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReportRecord {
    earthquake_no: i64,
    report_content: String,
    #[serde(rename = "ReportImageURI", default)]
    report_image_uri: Option<String>,
    earthquake_info: EarthquakeInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EarthquakeInfo {
    #[serde(deserialize_with = "origin_time")]
    origin_time: NaiveDateTime,
    focal_depth: Number,
    epicenter: Epicenter,
    earthquake_magnitude: Magnitude,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Epicenter {
    location: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Magnitude {
    magnitude_value: Number,
}

fn origin_time<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    NaiveDateTime::parse_from_str(raw.trim(), ORIGIN_TIME_FORMAT).map_err(serde::de::Error::custom)
}

impl From<ReportRecord> for EarthquakeReport {
    fn from(r: ReportRecord) -> Self {
        EarthquakeReport {
            id: r.earthquake_no,
            origin_time: r.earthquake_info.origin_time,
            magnitude: r.earthquake_info.earthquake_magnitude.magnitude_value,
            depth_km: r.earthquake_info.focal_depth,
            epicenter: r.earthquake_info.epicenter.location,
            content: r.report_content,
            image_uri: r.report_image_uri.filter(|u| !u.trim().is_empty()),
        }
    }
}

/// Newest report in an upstream body. `Ok(None)` when the envelope is flagged
/// unsuccessful or carries no records.
pub fn parse_latest(body: &str) -> Result<Option<EarthquakeReport>, ParseError> {
    let envelope: Envelope = serde_json::from_str(body)?;
    if envelope.success != "true" {
        return Ok(None);
    }
    Ok(envelope
        .records
        .and_then(|r| r.earthquake.into_iter().next())
        .map(EarthquakeReport::from))
}

#[derive(Clone)]
pub struct ReportFetcher {
    client: Client,
    url: String,
    api_key: String,
}

impl ReportFetcher {
    pub fn new(client: Client, url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client, url: url.into(), api_key: api_key.into() }
    }

    /// One fresh request. A success status with an unusable body is `Ok(None)`.
    pub async fn fetch_latest(&self) -> Result<Option<EarthquakeReport>, FetchError> {
        let res = self
            .client
            .get(&self.url)
            .query(&[
                ("Authorization", self.api_key.as_str()),
                ("limit", "10"),
                ("format", "JSON"),
            ])
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(FetchError::Unauthorized(status));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let body = res.text().await?;
        match parse_latest(&body) {
            Ok(Some(report)) => {
                tracing::debug!("latest upstream report id {}", report.id);
                Ok(Some(report))
            }
            Ok(None) => {
                tracing::warn!("upstream response carried no report");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!("{}; body: {}", e, crate::util::truncate(&body));
                Ok(None)
            }
        }
    }
}

/// Upstream body with a single report, used by the tests of this crate.
#[cfg(test)]
pub(crate) fn sample_body(id: i64, content: &str, image_uri: Option<&str>) -> String {
    serde_json::json!({
        "success": "true",
        "result": { "resource_id": "E-A0015-001" },
        "records": {
            "datasetDescription": "有感地震報告",
            "Earthquake": [{
                "EarthquakeNo": id,
                "ReportType": "地震報告",
                "ReportContent": content,
                "ReportImageURI": image_uri,
                "Web": "https://scweb.cwa.gov.tw/",
                "EarthquakeInfo": {
                    "OriginTime": "2024-04-03 07:58:09",
                    "Source": "中央氣象署",
                    "FocalDepth": 10.0,
                    "Epicenter": {
                        "Location": "Taipei City",
                        "EpicenterLatitude": 25.04,
                        "EpicenterLongitude": 121.51
                    },
                    "EarthquakeMagnitude": {
                        "MagnitudeType": "芮氏規模",
                        "MagnitudeValue": 4.5
                    }
                }
            }]
        }
    })
    .to_string()
}
