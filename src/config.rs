//! Configuration loading for the bot binary.

use std::path::Path;

use tracing::info;

use common::{config::AppConfig, Error, Result};

/// Load the TOML config file, apply environment overrides and validate.
/// A missing file is only an error when the path was given explicitly;
/// otherwise the defaults apply.
pub fn load(path: &Path, explicit: bool) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut config: AppConfig = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
    } else if explicit {
        return Err(Error::Config(format!(
            "config file not found: {}",
            path.display()
        )));
    } else {
        info!(path = %path.display(), "no config file, using defaults");
        AppConfig::default()
    };

    if let Ok(symbol) = std::env::var("APEX_SYMBOL") {
        if !symbol.trim().is_empty() {
            config.trading.symbol = symbol.trim().to_string();
        }
    }
    if let Ok(url) = std::env::var("APEX_ORDER_API_URL") {
        if !url.trim().is_empty() {
            config.paths.order_api_url = url.trim().to_string();
        }
    }

    validate(&config)?;
    Ok(config)
}

fn validate(config: &AppConfig) -> Result<()> {
    if config.trading.symbol.trim().is_empty() {
        return Err(Error::Config("trading.symbol must not be empty".into()));
    }
    if config.trading.initial_balance <= 0.0 {
        return Err(Error::Config(
            "trading.initial_balance must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.risk.max_position_fraction) {
        return Err(Error::Config(
            "risk.max_position_fraction must be in [0, 1]".into(),
        ));
    }
    if config.apex.drop_duration_seconds == 0 {
        return Err(Error::Config(
            "apex.drop_duration_seconds must be positive".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_path_yields_defaults() {
        let config = load(Path::new("definitely-not-here.toml"), false).unwrap();
        assert_eq!(config.trading.symbol, "BTC");
    }

    #[test]
    fn missing_explicit_path_is_fatal() {
        let result = load(Path::new("definitely-not-here.toml"), true);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn partial_file_parses_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[trading]\nsymbol = \"ETH\"\n").unwrap();
        let config = load(&path, true).unwrap();
        assert_eq!(config.trading.symbol, "ETH");
        assert!(config.risk.max_position_fraction > 0.0);
    }

    #[test]
    fn bad_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[trading]\ninitial_balance = -5.0\n").unwrap();
        assert!(matches!(load(&path, true), Err(Error::Config(_))));
    }
}
