//! CLI configuration commands

use anyhow::Result;

use crate::config::Config;
use crate::output::{format_optional, print_json, print_success, OutputFormat};

pub fn show(config: &Config, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config)?,
        OutputFormat::Table => {
            println!("Config file:        {}", Config::config_path()?.display());
            println!("API URL:            {}", config.resolve_api_url(None));
            println!("Default format:     {:?}", config.resolve_format(None));
            println!("Default confidence: {}", format_optional(config.default_confidence));
        }
    }
    Ok(())
}

pub fn set(
    mut config: Config,
    api_url: Option<String>,
    default_format: Option<OutputFormat>,
    default_confidence: Option<f64>,
) -> Result<()> {
    if let Some(c) = default_confidence {
        anyhow::ensure!(c > 0.0 && c < 1.0, "confidence must be between 0 and 1");
        config.default_confidence = Some(c);
    }
    if let Some(url) = api_url {
        url::Url::parse(&url)?;
        config.api_url = Some(url);
    }
    if default_format.is_some() {
        config.default_format = default_format;
    }

    let path = config.save()?;
    print_success(&format!("Saved {}", path.display()));
    Ok(())
}
