//! `ragloom serve`: start the HTTP API server.

use ragloom_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    config.validate()?;

    println!("ragloom gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.default_provider, config.default_model);
    println!("   SearXNG:   {}", config.retrieval.searxng_url);
    println!("   Qdrant:    {}", config.retrieval.qdrant_url);

    ragloom_gateway::start(config).await?;

    Ok(())
}
