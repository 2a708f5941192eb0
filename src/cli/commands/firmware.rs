//! Firmware command implementation

use anyhow::Result;

use super::{Services, finish_run, load_config, open_orchestrator, reprovision_prompt};
use crate::cli::args::Cli;

pub async fn execute_firmware_command(cli: &Cli) -> Result<()> {
    println!("🔥 Flashing firmware images");

    let config = load_config(cli, None)?;
    let (mut orchestrator, printer) =
        open_orchestrator(config, Services::default(), reprovision_prompt(false, true))?;

    let result = orchestrator.flash_firmware().await;
    let images = finish_run(orchestrator, printer, result).await?;

    println!();
    println!("🎉 Flashed {} image(s):", images.len());
    for image in &images {
        println!(
            "   0x{:08x}  {:<16} {} ({} bytes)",
            image.address,
            image.partition_name,
            image.path.display(),
            image.size
        );
    }
    Ok(())
}
