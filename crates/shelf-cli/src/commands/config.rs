//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use shelf_core::Config;

use crate::output::{Output, OutputFormat};

/// Show current configuration
pub fn show(config: &Config, config_path: &Path, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "data_dir": config.data_dir,
                    "backend_url": config.backend_url,
                    "api_key": config.api_key.as_deref().map(mask),
                    "table": config.table,
                    "realtime_enabled": config.realtime_enabled,
                    "oauth_provider": config.oauth_provider,
                    "redirect_url": config.redirect_url,
                    "log_level": config.log_level,
                    "log_file": config.log_file,
                    "config_file": config_path,
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config_path.display());
        }
        OutputFormat::Human => {
            println!("Configuration:");
            println!("  data_dir:         {}", config.data_dir.display());
            println!("  backend_url:      {}", or_unset(config.backend_url.as_deref()));
            println!(
                "  api_key:          {}",
                config
                    .api_key
                    .as_deref()
                    .map(mask)
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!("  table:            {}", config.table);
            println!("  realtime_enabled: {}", config.realtime_enabled);
            println!("  oauth_provider:   {}", config.oauth_provider);
            println!("  redirect_url:     {}", or_unset(config.redirect_url.as_deref()));
            println!("  log_level:        {}", or_unset(config.log_level.as_deref()));
            println!(
                "  log_file:         {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", config_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value and save it
pub fn set(
    mut config: Config,
    config_path: &Path,
    key: String,
    value: String,
    output: &Output,
) -> Result<()> {
    // "none" clears optional values, as does an empty string
    let value = if value == "none" { String::new() } else { value };
    config.set(&key, &value)?;
    config
        .save_to_path(&config_path.to_path_buf())
        .context("Failed to save configuration")?;

    output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

/// Show only the start of a key
fn mask(key: &str) -> String {
    let shown: String = key.chars().take(6).collect();
    if shown.len() == key.len() {
        "*".repeat(key.chars().count())
    } else {
        format!("{}…", shown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mask() {
        assert_eq!(mask("abc"), "***");
        assert_eq!(mask("eyJhbGciOiJIUzI1NiJ9"), "eyJhbG…");
    }

    #[test]
    fn test_set_saves_to_given_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            ..Config::default()
        };
        let output = Output::new(OutputFormat::Quiet);

        set(
            config,
            &path,
            "backend_url".to_string(),
            "https://abc.example.co".to_string(),
            &output,
        )
        .unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(saved.contains("backend_url = \"https://abc.example.co\""));
    }

    #[test]
    fn test_set_none_clears_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let config = Config {
            data_dir: temp_dir.path().join("data"),
            log_level: Some("debug".to_string()),
            ..Config::default()
        };
        let output = Output::new(OutputFormat::Quiet);

        set(config, &path, "log_level".to_string(), "none".to_string(), &output).unwrap();

        let saved = std::fs::read_to_string(&path).unwrap();
        assert!(!saved.contains("log_level"));
    }

    #[test]
    fn test_set_unknown_key_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        let output = Output::new(OutputFormat::Quiet);

        assert!(set(Config::default(), &path, "nope".to_string(), "1".to_string(), &output).is_err());
        assert!(!path.exists());
    }
}
