//! Partitions command implementation

use anyhow::Result;

use crate::cli::args::Cli;
use crate::config::BuildTypeRegistry;
use crate::partition::PartitionTable;

pub async fn execute_partitions_command(cli: &Cli) -> Result<()> {
    let config = super::load_config(cli, None)?;
    let registry = BuildTypeRegistry::new(&config.paths.build_types_root);
    let bin_type = &config.device.bin_type;

    let table =
        PartitionTable::load_for_build(&registry, bin_type, config.device.flash_size_bytes())?;

    println!("📋 Partition table for build type '{}':", bin_type);
    println!("{:<16} {:>12} {:>12}", "Name", "Offset", "Size");
    for entry in table.entries() {
        println!(
            "{:<16} {:>12} {:>12}",
            entry.name,
            entry.offset_hex(),
            entry.size_hex()
        );
    }

    let others = registry.list_build_types();
    if !others.is_empty() {
        println!();
        println!("Available build types: {}", others.join(", "));
    }
    Ok(())
}
