//! CLI command implementations

pub mod factory;
pub mod firmware;
pub mod flag;
pub mod info;
pub mod init_config;
pub mod model;
pub mod partitions;
pub mod password;
pub mod ports;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cli::args::{Cli, Commands};
use crate::cli::prompt::StdinPrompt;
use crate::config::ProvisionConfig;
use crate::device::select_port;
use crate::model::HttpModelConverter;
use crate::models::ProvisionEvent;
use crate::orchestrator::{FixedAnswer, OperatorPrompt, ProvisioningOrchestrator, RunResult};
use crate::registration::HttpRegistrationClient;
use crate::tools::Toolchain;

/// Execute a CLI command
pub async fn execute_command(cli: &Cli) -> Result<()> {
    match cli.command.clone() {
        Commands::Info {
            yes,
            skip_registered,
        } => info::execute_info_command(cli, yes, skip_registered).await,
        Commands::Firmware => firmware::execute_firmware_command(cli).await,
        Commands::Model { model_type } => {
            model::execute_model_command(cli, model_type.as_deref()).await
        }
        Commands::Flag { no_reset } => flag::execute_flag_command(cli, !no_reset).await,
        Commands::Factory {
            yes,
            skip_registered,
            model_type,
        } => {
            factory::execute_factory_command(cli, yes, skip_registered, model_type.as_deref())
                .await
        }
        Commands::Partitions => partitions::execute_partitions_command(cli).await,
        Commands::Ports => ports::execute_ports_command().await,
        Commands::Password { u_sn } => password::execute_password_command(&u_sn).await,
        Commands::InitConfig { force } => {
            init_config::execute_init_config_command(cli, force).await
        }
    }
}

/// Services a flow needs beyond the serial link
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Services {
    pub registration: bool,
    pub conversion: bool,
}

/// Load the configuration file and apply command line overrides
pub(crate) fn load_config(cli: &Cli, model_type: Option<&str>) -> Result<ProvisionConfig> {
    let mut config = ProvisionConfig::load(&cli.config).with_context(|| {
        format!(
            "run `ms500-provision init-config --config {}` to create one",
            cli.config.display()
        )
    })?;

    if let Some(bin_type) = &cli.bin_type {
        config.device.bin_type = bin_type.clone();
    }
    if let Some(model_type) = model_type {
        config.device.model_type = model_type.to_string();
    }
    if let Some(port) = &cli.port {
        config.device.port = Some(port.clone());
    }
    Ok(config)
}

/// Build an orchestrator bound to the selected port, with a task printing its events
pub(crate) fn open_orchestrator(
    config: ProvisionConfig,
    services: Services,
    prompt: Arc<dyn OperatorPrompt>,
) -> Result<(ProvisioningOrchestrator, JoinHandle<()>)> {
    let port = select_port(config.device.port.as_deref())?;
    let toolchain = Toolchain::from_config(&config.tools)?;

    let registration = if services.registration {
        Some(Arc::new(HttpRegistrationClient::from_config(
            &config.registration,
        )?))
    } else {
        None
    };
    let converter = if services.conversion {
        Some(Arc::new(HttpModelConverter::new(config.conversion.clone())?))
    } else {
        None
    };

    println!("🔌 Using port {}", port);
    println!(
        "📦 Build type: {}  🧠 Model type: {}",
        config.device.bin_type, config.device.model_type
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_event_printer(rx);

    let mut orchestrator = ProvisioningOrchestrator::new(Arc::new(config), &toolchain, port)
        .with_prompt(prompt)
        .with_events(tx);
    if let Some(api) = registration {
        orchestrator = orchestrator.with_registration(api);
    }
    if let Some(converter) = converter {
        orchestrator = orchestrator.with_converter(converter);
    }

    Ok((orchestrator, printer))
}

/// Prompt used for already registered devices
pub(crate) fn reprovision_prompt(yes: bool, skip_registered: bool) -> Arc<dyn OperatorPrompt> {
    if yes {
        Arc::new(FixedAnswer(true))
    } else if skip_registered {
        Arc::new(FixedAnswer(false))
    } else {
        Arc::new(StdinPrompt)
    }
}

fn spawn_event_printer(mut rx: mpsc::UnboundedReceiver<ProvisionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                ProvisionEvent::StageStarted(stage) => println!("⏳ {}...", stage),
                ProvisionEvent::StageCompleted(stage) => println!("✅ {} done", stage),
                ProvisionEvent::StateChanged(state) => log::debug!("State: {:?}", state),
                ProvisionEvent::Output(line) => println!("   {}", line),
                ProvisionEvent::Guidance(message) => println!("⚠️  {}", message),
            }
        }
    })
}

/// Drop the orchestrator, drain pending events and turn a run failure into an error
pub(crate) async fn finish_run<T>(
    orchestrator: ProvisioningOrchestrator,
    printer: JoinHandle<()>,
    result: RunResult<T>,
) -> Result<T> {
    drop(orchestrator);
    let _ = printer.await;

    match result {
        Ok(value) => Ok(value),
        Err(failure) => {
            println!();
            println!("❌ {}", failure);
            println!("💡 {}", failure.advice());
            Err(failure.into())
        }
    }
}
