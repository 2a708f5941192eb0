//! Factory command implementation

use anyhow::Result;

use super::info::print_info_outcome;
use super::{Services, finish_run, load_config, open_orchestrator, reprovision_prompt};
use crate::cli::args::Cli;

pub async fn execute_factory_command(
    cli: &Cli,
    yes: bool,
    skip_registered: bool,
    model_type: Option<&str>,
) -> Result<()> {
    println!("🏭 Running the full factory sequence");

    let config = load_config(cli, model_type)?;
    let artifact = config.paths.run_artifact.clone();
    let services = Services {
        registration: true,
        conversion: true,
    };
    let (mut orchestrator, printer) =
        open_orchestrator(config, services, reprovision_prompt(yes, skip_registered))?;

    let result = orchestrator.factory().await;
    let report = finish_run(orchestrator, printer, result).await?;

    print_info_outcome(&report.info, &artifact);
    println!("🔥 Firmware: {} image(s)", report.firmware.len());
    println!("🧠 Model: {}", report.model.dnn_dir.display());
    println!("🎉 Factory provisioning complete");
    Ok(())
}
