//! Model command implementation

use anyhow::Result;

use super::{Services, finish_run, load_config, open_orchestrator, reprovision_prompt};
use crate::cli::args::Cli;

pub async fn execute_model_command(cli: &Cli, model_type: Option<&str>) -> Result<()> {
    println!("🧠 Converting and flashing the AI model");

    let config = load_config(cli, model_type)?;
    let services = Services {
        conversion: true,
        ..Services::default()
    };
    let (mut orchestrator, printer) =
        open_orchestrator(config, services, reprovision_prompt(false, true))?;

    let result = orchestrator.flash_model().await;
    let prepared = finish_run(orchestrator, printer, result).await?;

    println!();
    println!("🎉 Model flashed to storage_dl:");
    for file in &prepared.files {
        println!("   {}", file.display());
    }
    Ok(())
}
