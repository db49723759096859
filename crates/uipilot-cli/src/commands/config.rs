use anyhow::{Context, Result};
use uipilot_core::config::PilotConfig;
use uipilot_infrastructure::ConfigService;

pub fn show(service: &ConfigService, config: &PilotConfig) -> Result<()> {
    let mut shown = config.clone();
    if shown.inference.api_key.is_some() {
        shown.inference.api_key = Some("********".to_string());
    }
    println!("# {}", service.path().display());
    print!(
        "{}",
        toml::to_string_pretty(&shown).context("Failed to render configuration")?
    );
    Ok(())
}

pub fn init(service: &ConfigService) -> Result<()> {
    if service.write_default_if_missing()? {
        println!("Created {}", service.path().display());
    } else {
        println!("{} already exists, left unchanged", service.path().display());
    }
    Ok(())
}
