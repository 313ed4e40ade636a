//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("{}", "No items found".yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// `low – high` with the confidence level, or a dash
pub fn format_interval(lower: Option<f64>, upper: Option<f64>, confidence: Option<f64>) -> String {
    match (lower, upper) {
        (Some(lo), Some(hi)) => match confidence {
            Some(c) => format!("{:.1} – {:.1} ({:.0}%)", lo, hi, c * 100.0),
            None => format!("{:.1} – {:.1}", lo, hi),
        },
        _ => "-".to_string(),
    }
}

pub fn format_optional<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Format timestamp for display
pub fn format_timestamp(ts: Option<chrono::DateTime<chrono::Utc>>) -> String {
    ts.map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M").to_string())
}

/// Color a retrain or health state
pub fn color_state(state: &str) -> String {
    match state.to_lowercase().as_str() {
        "monitoring" | "healthy" | "stable" => state.green().to_string(),
        "drift_accumulating" | "undetermined" | "degraded" | "warning" => state.yellow().to_string(),
        "retrain_triggered" | "retraining" => state.blue().to_string(),
        "cooldown" | "drifted" | "unhealthy" | "high" | "critical" => state.red().to_string(),
        _ => state.to_string(),
    }
}
