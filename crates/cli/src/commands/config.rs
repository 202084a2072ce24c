//! `ragloom config`: print configuration.

use ragloom_config::AppConfig;

pub async fn run(default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render(&config)?);

    if let Err(e) = config.validate() {
        eprintln!("warning: {e}");
    }
    if !config.has_api_key() {
        eprintln!("warning: no API key set (RAGLOOM_API_KEY, OPENAI_API_KEY or ANTHROPIC_API_KEY)");
    }
    Ok(())
}

/// The effective configuration as TOML, headed by its file path, secrets redacted.
fn render(config: &AppConfig) -> Result<String, ragloom_config::ConfigError> {
    let path = AppConfig::config_dir().join("config.toml");
    Ok(format!("# {}\n{}", path.display(), config.redacted().to_toml()?))
}
