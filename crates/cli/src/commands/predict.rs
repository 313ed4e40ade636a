//! Prediction and outcome commands

use anyhow::Result;
use std::collections::BTreeMap;
use tabled::Tabled;

use crate::client::{ApiClient, OutcomeReport, OutcomeRequest, Prediction, PredictionRequest};
use crate::output::{
    color_state, format_interval, format_optional, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Prediction ID")]
    prediction_id: String,
    #[tabled(rename = "Subject")]
    subject: String,
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Interval")]
    interval: String,
    #[tabled(rename = "Model")]
    model_version: String,
}

#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Predicted")]
    predicted: String,
    #[tabled(rename = "Actual")]
    actual: String,
    #[tabled(rename = "Abs Error")]
    error: String,
    #[tabled(rename = "Drift Check")]
    drift: String,
    #[tabled(rename = "Window MAE")]
    window_mae: String,
}

/// Parse `name=value` into a feature
pub fn parse_feature(s: &str) -> Result<(String, f64), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("feature name is empty in '{}'", s));
    }
    let value: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number", value.trim()))?;
    if !value.is_finite() {
        return Err(format!("feature '{}' must be finite", name));
    }
    Ok((name.to_string(), value))
}

pub async fn predict(
    client: &ApiClient,
    subject: &str,
    features: Vec<(String, f64)>,
    point_only: bool,
    confidence: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    let request = PredictionRequest {
        features: features.into_iter().collect::<BTreeMap<_, _>>(),
        interval: !point_only,
        confidence,
    };

    let url = client.subject_url(subject, "predictions")?;
    let prediction: Prediction = client.post(url, Some(&request)).await?;

    match format {
        OutputFormat::Json => print_json(&prediction)?,
        OutputFormat::Table => {
            let row = PredictionRow {
                prediction_id: prediction.prediction_id.clone(),
                subject: prediction.subject.clone(),
                predicted: format!("{:.1}", prediction.predicted_value),
                interval: format_interval(
                    prediction.lower_bound,
                    prediction.upper_bound,
                    prediction.confidence_level,
                ),
                model_version: prediction.model_version.clone(),
            };
            print_table(vec![row]);

            if let Some(unavailable) = &prediction.interval_unavailable {
                let detail = match (unavailable.sample_count, unavailable.required) {
                    (Some(n), Some(required)) => format!(" ({} of {} shots needed)", n, required),
                    _ => String::new(),
                };
                print_warning(&format!("No interval: {}{}", unavailable.reason, detail));
            }
            if !prediction.missing_features.is_empty() {
                print_info(&format!(
                    "Missing features filled with defaults: {}",
                    prediction.missing_features.join(", ")
                ));
            }
        }
    }

    Ok(())
}

pub async fn outcome(
    client: &ApiClient,
    subject: &str,
    prediction_id: &str,
    actual_value: f64,
    format: OutputFormat,
) -> Result<()> {
    let request = OutcomeRequest {
        prediction_id: prediction_id.to_string(),
        actual_value,
    };

    let url = client.subject_url(subject, "outcomes")?;
    let report: OutcomeReport = client.post(url, Some(&request)).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!("Outcome recorded for prediction {}", report.prediction_id));

            let window_mae = report
                .drift
                .window_mae
                .or_else(|| report.drift.event.as_ref().map(|e| e.window_mae));
            print_table(vec![OutcomeRow {
                predicted: format!("{:.1}", report.predicted_value),
                actual: format!("{:.1}", report.actual_value),
                error: format!("{:.2}", report.absolute_error),
                drift: color_state(&report.drift.result),
                window_mae: format_optional(window_mae.map(|m| format!("{:.2}", m))),
            }]);

            if let Some(event) = &report.drift.event {
                print_warning(&format!(
                    "Drift ({}): window MAE {:.2} vs baseline {:.2} over {} shots",
                    color_state(&event.severity),
                    event.window_mae,
                    event.baseline_mae,
                    event.window_size
                ));
            }
        }
    }

    Ok(())
}
