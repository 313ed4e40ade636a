//! API client for the shot model service

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// `/v1/subjects/<subject>/<action>` with the subject percent-encoded
    pub fn subject_url(&self, subject: &str, action: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("API URL cannot be a base: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v1", "subjects", subject, action]);
        Ok(url)
    }

    pub async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        Self::parse(response).await
    }

    /// POST with a JSON body (`None` sends no body)
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, url: Url, body: Option<&B>) -> Result<T> {
        let mut request = self.client.post(url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.context("Failed to send request")?;

        Self::parse(response).await
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API request and response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub features: BTreeMap<String, f64>,
    pub interval: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Point and interval predictions share this shape; interval fields are absent on point results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub subject: String,
    pub predicted_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_level: Option<f64>,
    #[serde(default)]
    pub has_interval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_unavailable: Option<IntervalUnavailable>,
    pub model_version: String,
    #[serde(default)]
    pub missing_features: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntervalUnavailable {
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeRequest {
    pub prediction_id: String,
    pub actual_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub prediction_id: String,
    pub subject: String,
    pub predicted_value: f64,
    pub actual_value: f64,
    pub absolute_error: f64,
    pub model_version: String,
    pub drift: DriftCheck,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftCheck {
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_mae: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<DriftEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftEvent {
    pub window_mae: f64,
    pub baseline_mae: f64,
    pub window_size: usize,
    pub threshold: f64,
    pub severity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accuracy {
    pub mae: f64,
    pub rmse: f64,
    pub evaluated_on: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub subject: String,
    pub model_version: String,
    pub trained_at: Option<DateTime<Utc>>,
    pub sample_count: Option<usize>,
    pub accuracy: Option<Accuracy>,
    pub dataset_tier: Option<String>,
    pub has_calibration: bool,
    pub current_drift_state: String,
    pub consecutive_drift_count: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub window_mae: Option<f64>,
    pub window_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionList {
    pub subject: String,
    pub versions: Vec<String>,
    pub latest: Option<String>,
}

/// Metadata of a freshly published model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishedModel {
    pub subject: String,
    pub version: String,
    pub trained_at: DateTime<Utc>,
    pub sample_count: usize,
    pub dataset_tier: String,
    pub accuracy: Accuracy,
    pub calibration: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_url_encodes_subject() {
        let client = ApiClient::new("http://localhost:8080/").unwrap();
        let url = client.subject_url("7 Iron", "predictions").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/subjects/7%20Iron/predictions");
    }

    #[test]
    fn test_point_prediction_parses_without_interval_fields() {
        let body = r#"{"prediction_id":"a","subject":"Driver","predicted_value":231.5,"model_version":"v1","missing_features":[]}"#;
        let prediction: Prediction = serde_json::from_str(body).unwrap();
        assert!(!prediction.has_interval);
        assert!(prediction.lower_bound.is_none());
    }
}
