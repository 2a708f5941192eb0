//! Flag command implementation

use anyhow::Result;

use super::{Services, finish_run, load_config, open_orchestrator, reprovision_prompt};
use crate::cli::args::Cli;

pub async fn execute_flag_command(cli: &Cli, reset: bool) -> Result<()> {
    println!("🚩 Setting the model update flag");

    let config = load_config(cli, None)?;
    let (mut orchestrator, printer) =
        open_orchestrator(config, Services::default(), reprovision_prompt(false, true))?;

    let result = orchestrator.set_model_flag(reset).await;
    let records = finish_run(orchestrator, printer, result).await?;

    println!();
    println!("🎉 NVS rewritten with {} record(s)", records.len());
    if !reset {
        println!("   Reset the device to apply the update");
    }
    Ok(())
}
