//! Init-config command implementation

use anyhow::{Result, bail};

use crate::cli::args::Cli;
use crate::config::ProvisionConfig;

pub async fn execute_init_config_command(cli: &Cli, force: bool) -> Result<()> {
    let path = &cli.config;
    if path.exists() && !force {
        bail!(
            "{} already exists, use --force to overwrite it",
            path.display()
        );
    }

    ProvisionConfig::default().save(path)?;
    println!("📝 Wrote default configuration to {}", path.display());
    println!("   Fill in the [registration] and [conversion] sections before provisioning");
    Ok(())
}
