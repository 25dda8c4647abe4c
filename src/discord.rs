//! Discord webhook delivery: the plain advisory and the rich report embed.

use std::path::PathBuf;

use chrono::{Datelike, NaiveDateTime, Timelike};
use reqwest::{multipart, Client};
use serde::Serialize;

use crate::models::EarthquakeReport;

pub const EMBED_TITLE: &str = "地震報告";
pub const EMBED_COLOR: u32 = 1940253;
pub const FOOTER_TEXT: &str = "地震速報";
pub const FOOTER_ICON: &str = "https://i.imgur.com/6I4Z7Rq.png";
pub const IMAGE_NAME: &str = "latest_report.png";

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook #{target} rejected the message: status={status} body={body}")]
    Rejected {
        target: usize,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("webhook #{target} request failed: {source}")]
    Request {
        target: usize,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not encode webhook payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    pub footer: EmbedFooter,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedFooter {
    pub text: String,
    pub icon_url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Outcome of posting one report to one target.
#[derive(Debug)]
pub struct Delivery {
    pub target: usize,
    pub result: Result<(), NotifyError>,
}

impl Delivery {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub fn advisory_message(city: &str) -> String {
    format!("{}即將發生地震", city)
}

pub fn format_origin_time(t: &NaiveDateTime) -> String {
    format!(
        "{}年{}月{}日 {}點{}分{}秒",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

/// Double spaces in the upstream location text render as code spans.
pub fn format_epicenter(location: &str) -> String {
    format!("{} ", location.replace("  ", "``"))
}

pub fn build_embed(report: &EarthquakeReport, with_image: bool) -> Embed {
    Embed {
        title: EMBED_TITLE.to_string(),
        description: report.content.clone(),
        color: EMBED_COLOR,
        image: with_image.then(|| EmbedImage { url: format!("attachment://{}", IMAGE_NAME) }),
        footer: EmbedFooter {
            text: FOOTER_TEXT.to_string(),
            icon_url: FOOTER_ICON.to_string(),
        },
        fields: vec![
            EmbedField {
                name: "發生時間".to_string(),
                value: format_origin_time(&report.origin_time),
                inline: false,
            },
            EmbedField {
                name: "規模".to_string(),
                value: format!("`{}`", report.magnitude),
                inline: true,
            },
            EmbedField {
                name: "深度".to_string(),
                value: format!("`{}`公里", report.depth_km),
                inline: true,
            },
            EmbedField {
                name: "震央".to_string(),
                value: format_epicenter(&report.epicenter),
                inline: false,
            },
        ],
    }
}

#[derive(Clone)]
pub struct Notifier {
    client: Client,
    targets: Vec<String>,
    image_path: PathBuf,
}

impl Notifier {
    pub fn new(client: Client, targets: Vec<String>, image_path: impl Into<PathBuf>) -> Self {
        Self { client, targets, image_path: image_path.into() }
    }

    pub fn targets(&self) -> usize {
        self.targets.len()
    }

    /// Posts the advisory to every target in order, stopping at the first one
    /// that does not accept it.
    pub async fn send_alert(&self, city: &str) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            content: Some(advisory_message(city)),
            embeds: Vec::new(),
        };
        for (idx, url) in self.targets.iter().enumerate() {
            self.post(idx, url, &payload, None).await?;
            tracing::debug!("advisory accepted by webhook #{}", idx);
        }
        tracing::info!("advisory sent to {} webhook(s): {}", self.targets.len(), advisory_message(city));
        Ok(())
    }

    /// Posts the report embed to every target. The image is attached when it
    /// could be downloaded and stored; otherwise the embed goes out without it.
    pub async fn send_report(&self, report: &EarthquakeReport) -> Vec<Delivery> {
        let image = self.fetch_image(report).await;
        let payload = WebhookPayload {
            content: None,
            embeds: vec![build_embed(report, image.is_some())],
        };

        let mut deliveries = Vec::with_capacity(self.targets.len());
        for (idx, url) in self.targets.iter().enumerate() {
            let result = self.post(idx, url, &payload, image.as_deref()).await;
            match &result {
                Ok(()) => tracing::info!("report {} delivered to webhook #{}", report.id, idx),
                Err(e) => tracing::warn!("report {} not delivered: {}", report.id, e),
            }
            deliveries.push(Delivery { target: idx, result });
        }
        deliveries
    }

    async fn fetch_image(&self, report: &EarthquakeReport) -> Option<Vec<u8>> {
        let Some(uri) = report.image_uri.as_deref() else {
            tracing::warn!("report {} has no image; sending without it", report.id);
            return None;
        };

        tracing::info!("downloading report image");
        let res = match self.client.get(uri).send().await {
            Ok(res) => res,
            Err(e) => {
                tracing::warn!("image request failed, sending without it: {}", e);
                return None;
            }
        };
        if res.status() != reqwest::StatusCode::OK {
            tracing::warn!("image fetch returned {}, sending without it", res.status());
            return None;
        }
        let bytes = match res.bytes().await {
            Ok(b) => b.to_vec(),
            Err(e) => {
                tracing::warn!("image download interrupted, sending without it: {}", e);
                return None;
            }
        };
        if let Err(e) = tokio::fs::write(&self.image_path, &bytes).await {
            tracing::warn!("could not save image to {}, sending without it: {}", self.image_path.display(), e);
            return None;
        }
        tracing::info!("image saved ({} bytes)", bytes.len());
        Some(bytes)
    }

    async fn post(
        &self,
        target: usize,
        url: &str,
        payload: &WebhookPayload,
        image: Option<&[u8]>,
    ) -> Result<(), NotifyError> {
        let req = match image {
            Some(bytes) => {
                let part = multipart::Part::bytes(bytes.to_vec())
                    .file_name(IMAGE_NAME)
                    .mime_str("image/png")
                    .map_err(|source| NotifyError::Request { target, source })?;
                let form = multipart::Form::new()
                    .text("payload_json", serde_json::to_string(payload)?)
                    .part("files[0]", part);
                self.client.post(url).multipart(form)
            }
            None => self.client.post(url).json(payload),
        };

        let res = req
            .send()
            .await
            .map_err(|source| NotifyError::Request { target, source })?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                target,
                status,
                body: crate::util::truncate(&body),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use mockito::{Matcher, Server};
    use serde_json::Number;
    use std::time::Duration;
    use tempfile::tempdir;

    fn report(image_uri: Option<String>) -> EarthquakeReport {
        EarthquakeReport {
            id: 1002,
            origin_time: NaiveDate::from_ymd_opt(2024, 4, 3).unwrap().and_hms_opt(7, 58, 9).unwrap(),
            magnitude: Number::from_f64(4.5).unwrap(),
            depth_km: Number::from_f64(10.0).unwrap(),
            epicenter: "花蓮縣政府南南東方  25.0  公里".to_string(),
            content: "X".to_string(),
            image_uri,
        }
    }

    fn notifier(targets: Vec<String>, image_path: PathBuf) -> Notifier {
        let client = crate::util::http_client(Duration::from_secs(5)).unwrap();
        Notifier::new(client, targets, image_path)
    }

    #[test]
    fn test_format_origin_time_is_unpadded() {
        let t = NaiveDate::from_ymd_opt(2024, 4, 3).unwrap().and_hms_opt(7, 5, 9).unwrap();
        assert_eq!(format_origin_time(&t), "2024年4月3日 7點5分9秒");
    }

    #[test]
    fn test_format_epicenter() {
        assert_eq!(format_epicenter("Taipei City"), "Taipei City ");
        assert_eq!(format_epicenter("南南東方  25.0  公里"), "南南東方``25.0``公里 ");
    }

    #[test]
    fn test_build_embed_fields() {
        let embed = build_embed(&report(None), false);
        assert_eq!(embed.title, EMBED_TITLE);
        assert_eq!(embed.description, "X");
        assert_eq!(embed.color, EMBED_COLOR);
        assert!(embed.image.is_none());
        assert_eq!(embed.footer.text, FOOTER_TEXT);

        let values: Vec<(&str, &str, bool)> = embed
            .fields
            .iter()
            .map(|f| (f.name.as_str(), f.value.as_str(), f.inline))
            .collect();
        assert_eq!(
            values,
            vec![
                ("發生時間", "2024年4月3日 7點58分9秒", false),
                ("規模", "`4.5`", true),
                ("深度", "`10.0`公里", true),
                ("震央", "花蓮縣政府南南東方``25.0``公里 ", false),
            ]
        );

        let with_image = build_embed(&report(None), true);
        assert_eq!(with_image.image.unwrap().url, "attachment://latest_report.png");
    }

    #[test]
    fn test_whole_numbers_keep_their_decimal() {
        let body = crate::cwa::sample_body(113010, "規模5.0有感地震", None)
            .replace("\"MagnitudeValue\":4.5", "\"MagnitudeValue\":5.0");
        let parsed = crate::cwa::parse_latest(&body).unwrap().unwrap();
        let embed = build_embed(&parsed, false);
        assert_eq!(embed.fields[1].value, "`5.0`");
        assert_eq!(embed.fields[2].value, "`10.0`公里");
    }

    #[test]
    fn test_advisory_payload_shape() {
        let payload = WebhookPayload { content: Some(advisory_message("臺北市")), embeds: Vec::new() };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json, serde_json::json!({ "content": "臺北市即將發生地震" }));
    }

    #[tokio::test]
    async fn test_send_alert_stops_at_first_rejection() {
        let mut server = Server::new_async().await;
        let first = server
            .mock("POST", "/hook-a")
            .match_body(Matcher::PartialJson(serde_json::json!({ "content": "臺北市即將發生地震" })))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;
        let second = server
            .mock("POST", "/hook-b")
            .with_status(404)
            .with_body(r#"{"message":"Unknown Webhook"}"#)
            .expect(1)
            .create_async()
            .await;
        let third = server.mock("POST", "/hook-c").with_status(204).expect(0).create_async().await;

        let dir = tempdir().unwrap();
        let n = notifier(
            vec![
                format!("{}/hook-a", server.url()),
                format!("{}/hook-b", server.url()),
                format!("{}/hook-c", server.url()),
            ],
            dir.path().join(IMAGE_NAME),
        );
        let err = n.send_alert("臺北市").await.unwrap_err();
        assert!(matches!(err, NotifyError::Rejected { target: 1, .. }));

        first.assert_async().await;
        second.assert_async().await;
        third.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_report_attaches_image() {
        let mut server = Server::new_async().await;
        let image = server
            .mock("GET", "/image.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(b"\x89PNG-bytes")
            .create_async()
            .await;
        let hook = server
            .mock("POST", "/hook")
            .match_header("content-type", Matcher::Regex("^multipart/form-data".to_string()))
            .match_body(Matcher::Regex("attachment://latest_report.png".to_string()))
            .with_status(200)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let image_path = dir.path().join(IMAGE_NAME);
        let n = notifier(vec![format!("{}/hook", server.url())], image_path.clone());
        let deliveries = n.send_report(&report(Some(format!("{}/image.png", server.url())))).await;

        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].is_ok());
        assert_eq!(std::fs::read(&image_path).unwrap(), b"\x89PNG-bytes");
        image.assert_async().await;
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_report_degrades_without_image() {
        let mut server = Server::new_async().await;
        let _image = server.mock("GET", "/image.png").with_status(404).create_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex(r#""description":"X""#.to_string()),
                Matcher::Regex("規模".to_string()),
                Matcher::Regex("震央".to_string()),
            ]))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let image_path = dir.path().join(IMAGE_NAME);
        let n = notifier(vec![format!("{}/hook", server.url())], image_path.clone());
        let deliveries = n.send_report(&report(Some(format!("{}/image.png", server.url())))).await;

        assert!(deliveries.iter().all(Delivery::is_ok));
        assert!(!image_path.exists());
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_report_degrades_when_image_host_unreachable() {
        let mut server = Server::new_async().await;
        let hook = server
            .mock("POST", "/hook")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Regex(r#""description":"X""#.to_string()))
            .with_status(204)
            .expect(1)
            .create_async()
            .await;

        let dir = tempdir().unwrap();
        let image_path = dir.path().join(IMAGE_NAME);
        let n = notifier(vec![format!("{}/hook", server.url())], image_path.clone());
        // Nothing listens on port 1.
        let deliveries = n.send_report(&report(Some("http://127.0.0.1:1/report.png".to_string()))).await;

        assert_eq!(deliveries.len(), 1);
        assert!(deliveries[0].is_ok());
        assert!(!image_path.exists());
        hook.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_report_keeps_going_after_failed_target() {
        let mut server = Server::new_async().await;
        let bad = server.mock("POST", "/bad").with_status(500).expect(1).create_async().await;
        let good = server.mock("POST", "/good").with_status(204).expect(1).create_async().await;

        let dir = tempdir().unwrap();
        let n = notifier(
            vec![format!("{}/bad", server.url()), format!("{}/good", server.url())],
            dir.path().join(IMAGE_NAME),
        );
        let deliveries = n.send_report(&report(None)).await;

        assert!(!deliveries[0].is_ok());
        assert!(deliveries[1].is_ok());
        bad.assert_async().await;
        good.assert_async().await;
    }
}
