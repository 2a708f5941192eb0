//! Info command implementation

use anyhow::Result;

use super::{Services, finish_run, load_config, open_orchestrator, reprovision_prompt};
use crate::cli::args::Cli;
use crate::orchestrator::InfoOutcome;

pub async fn execute_info_command(cli: &Cli, yes: bool, skip_registered: bool) -> Result<()> {
    println!("🪪 Registering device and writing NVS");

    let config = load_config(cli, None)?;
    let artifact = config.paths.run_artifact.clone();
    let services = Services {
        registration: true,
        ..Services::default()
    };
    let (mut orchestrator, printer) =
        open_orchestrator(config, services, reprovision_prompt(yes, skip_registered))?;

    let result = orchestrator.provision_info().await;
    let outcome = finish_run(orchestrator, printer, result).await?;
    print_info_outcome(&outcome, &artifact);
    Ok(())
}

pub(crate) fn print_info_outcome(outcome: &InfoOutcome, artifact: &std::path::Path) {
    match outcome {
        InfoOutcome::Registered { mac, result, .. } => {
            println!();
            println!("🎉 Device registered");
            println!("   MAC:         {}", mac);
            println!("   u_camera_id: {}", result.u_camera_id);
            println!("   u_unit_id:   {}", result.u_unit_id);
            println!("   account id:  {}", result.u_account_id);
            println!("   response saved to {}", artifact.display());
        }
        InfoOutcome::Skipped { mac } => {
            println!();
            println!("⏭️  Device {} already provisioned, left untouched", mac);
        }
    }
}
