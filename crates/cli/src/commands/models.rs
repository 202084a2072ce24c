//! `ragloom models`: list the models each configured provider offers.

use ragloom_config::AppConfig;
use ragloom_providers::{ListingStatus, ModelRegistry};

pub async fn run(refresh: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let providers = ragloom_providers::build_from_config(&config);

    let mut registry = ModelRegistry::from_router(&providers);
    if refresh {
        registry = registry
            .refresh(&providers, ragloom_gateway::MODEL_LIST_TIMEOUT)
            .await;
    }

    print!("{}", render(&registry));
    if !refresh {
        println!();
        println!("  Run with --refresh to query providers for their models.");
    }
    Ok(())
}

fn render(registry: &ModelRegistry) -> String {
    let mut out = String::new();
    if registry.providers.is_empty() {
        out.push_str("No providers configured. Set an API key.\n");
        return out;
    }

    for (name, listing) in &registry.providers {
        let marker = if *name == registry.default_provider { " (default)" } else { "" };
        let status = match &listing.status {
            ListingStatus::Unknown => "not listed".to_string(),
            ListingStatus::Fresh => format!("{} models", listing.models.len()),
            ListingStatus::Stale { error } => format!("stale: {error}"),
        };
        out.push_str(&format!("{name}{marker}: {status}\n"));

        for model in &listing.models {
            let current = if *name == registry.default_provider && *model == registry.default_model {
                " *"
            } else {
                ""
            };
            out.push_str(&format!("  {model}{current}\n"));
        }
    }
    out
}
