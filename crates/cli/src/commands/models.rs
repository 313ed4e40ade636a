//! Model health, version and training commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ModelHealth, PublishedModel, VersionList};
use crate::output::{
    color_state, format_optional, format_timestamp, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Serving")]
    serving: String,
}

fn field(field: &'static str, value: impl Into<String>) -> FieldRow {
    FieldRow {
        field,
        value: value.into(),
    }
}

pub async fn health(client: &ApiClient, subject: &str, format: OutputFormat) -> Result<()> {
    let health: ModelHealth = client.get(client.subject_url(subject, "health")?).await?;

    match format {
        OutputFormat::Json => print_json(&health)?,
        OutputFormat::Table => {
            let accuracy = health.accuracy.as_ref();
            print_table(vec![
                field("Subject", health.subject.clone()),
                field("Model version", health.model_version.clone()),
                field("Trained", format_timestamp(health.trained_at)),
                field("Shots", format_optional(health.sample_count)),
                field("Tier", format_optional(health.dataset_tier.clone())),
                field("MAE", format_optional(accuracy.map(|a| format!("{:.2}", a.mae)))),
                field("RMSE", format_optional(accuracy.map(|a| format!("{:.2}", a.rmse)))),
                field("Intervals", if health.has_calibration { "yes" } else { "no" }),
                field("Retrain state", color_state(&health.current_drift_state)),
                field("Drift events", health.consecutive_drift_count.to_string()),
                field(
                    "Window MAE",
                    format!(
                        "{} ({} shots)",
                        format_optional(health.window_mae.map(|m| format!("{:.2}", m))),
                        health.window_size
                    ),
                ),
            ]);

            if let Some(until) = health.cooldown_until {
                print_warning(&format!(
                    "Retraining cooling down until {}",
                    format_timestamp(Some(until))
                ));
            }
        }
    }

    Ok(())
}

pub async fn versions(client: &ApiClient, subject: &str, format: OutputFormat) -> Result<()> {
    let list: VersionList = client.get(client.subject_url(subject, "versions")?).await?;

    match format {
        OutputFormat::Json => print_json(&list)?,
        OutputFormat::Table => {
            if list.versions.is_empty() {
                print_warning(&format!("No model trained yet for {}", list.subject));
                return Ok(());
            }

            let rows: Vec<VersionRow> = list
                .versions
                .iter()
                .rev()
                .map(|v| VersionRow {
                    version: v.clone(),
                    serving: if list.latest.as_deref() == Some(v.as_str()) {
                        "✓".to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();
            print_table(rows);
            println!("\nTotal: {} versions", list.versions.len());
        }
    }

    Ok(())
}

pub async fn train(client: &ApiClient, subject: &str, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Table {
        print_info(&format!("Training {}...", subject));
    }

    let url = client.subject_url(subject, "train")?;
    let model: PublishedModel = client.post::<_, ()>(url, None).await?;

    match format {
        OutputFormat::Json => print_json(&model)?,
        OutputFormat::Table => {
            print_success(&format!("Published {} for {}", model.version, model.subject));
            let calibration = model
                .calibration
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown")
                .to_string();
            print_table(vec![
                field("Trained", format_timestamp(Some(model.trained_at))),
                field("Shots", model.sample_count.to_string()),
                field("Tier", model.dataset_tier.clone()),
                field("MAE", format!("{:.2}", model.accuracy.mae)),
                field("Evaluated on", model.accuracy.evaluated_on.to_string()),
                field("Calibration", calibration),
            ]);
        }
    }

    Ok(())
}
