//! External tool invocation
//!
//! The flasher, the NVS decoder/generator and the FAT image generator are
//! all separate programs. Components only see the [`ExternalTool`] trait so
//! tests can substitute scripted fakes for real processes.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use crate::config::ToolsConfig;
use crate::errors::{ProvisionError, Result};

/// Captured result of one tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Operator-facing dump of everything the tool printed
    pub fn diagnostic(&self) -> String {
        let mut text = String::new();
        text.push_str(&"-".repeat(60));
        text.push_str("\nTool output:\n");
        text.push_str(&"-".repeat(60));
        text.push('\n');
        if !self.stdout.trim().is_empty() {
            text.push_str(self.stdout.trim_end());
            text.push('\n');
        }
        if self.stderr.trim().is_empty() {
            if self.stdout.trim().is_empty() {
                text.push_str("(no error details)\n");
            }
        } else {
            text.push_str(self.stderr.trim_end());
            text.push('\n');
        }
        match self.exit_code {
            Some(code) => text.push_str(&format!("exit code: {}", code)),
            None => text.push_str("terminated by signal"),
        }
        text
    }
}

/// A program that can be invoked with arguments and yields captured output
#[async_trait]
pub trait ExternalTool: Send + Sync {
    /// Human readable name used in logs
    fn name(&self) -> &str;

    /// Run the tool to completion. `Err` means the tool could not be started;
    /// a non-zero exit is reported through [`ToolOutput::exit_code`].
    async fn run(&self, args: &[String]) -> Result<ToolOutput>;
}

/// [`ExternalTool`] backed by a child process
#[derive(Debug, Clone)]
pub struct ProcessTool {
    name: String,
    program: PathBuf,
    base_args: Vec<String>,
}

impl ProcessTool {
    pub fn new(name: impl Into<String>, program: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    /// Arguments inserted before every call's own arguments
    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Build from a full command line such as `["python", "-m", "esptool"]`
    pub fn from_command_line(name: impl Into<String>, command: &[String]) -> Result<Self> {
        let name = name.into();
        let (program, rest) = command
            .split_first()
            .ok_or_else(|| ProvisionError::config(format!("empty command for tool '{}'", name)))?;
        Ok(Self::new(name, program).with_base_args(rest.iter().cloned()))
    }

    /// Check that the program can be found, either as a path or on PATH
    pub fn ensure_available(&self) -> Result<PathBuf> {
        which::which(&self.program).map_err(|e| {
            ProvisionError::config(format!(
                "{} not found ({}): {}",
                self.name,
                self.program.display(),
                e
            ))
        })
    }
}

impl fmt::Display for ProcessTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.base_args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalTool for ProcessTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, args: &[String]) -> Result<ToolOutput> {
        log::debug!("Execute command: {} {}", self, args.join(" "));

        let output = tokio::process::Command::new(&self.program)
            .args(&self.base_args)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProvisionError::config(format!(
                    "failed to start {} ({}): {}",
                    self.name,
                    self.program.display(),
                    e
                ))
            })?;

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        log::trace!("{} exited with {:?}", self.name, result.exit_code);
        Ok(result)
    }
}

/// The set of external programs a provisioning run depends on
#[derive(Clone)]
pub struct Toolchain {
    /// esptool-compatible flasher
    pub flasher: Arc<dyn ExternalTool>,
    /// `nvs_tool.py` style decoder producing a `namespace:key = value` dump
    pub nvs_decoder: Arc<dyn ExternalTool>,
    /// `esp_idf_nvs_partition_gen` style generator
    pub nvs_generator: Arc<dyn ExternalTool>,
    /// `wl_fatfsgen.py` style FAT image generator
    pub fatfs_generator: Arc<dyn ExternalTool>,
}

impl Toolchain {
    /// Build process-backed tools from configuration
    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        let flasher = ProcessTool::from_command_line("esptool", &config.esptool)?;
        let nvs_decoder = ProcessTool::new("nvs_tool", &config.python)
            .with_base_args([config.nvs_tool_script.display().to_string()]);
        let nvs_generator = ProcessTool::new("nvs_partition_gen", &config.python)
            .with_base_args(["-m".to_string(), config.nvs_gen_module.clone()]);
        let fatfs_generator = ProcessTool::new("wl_fatfsgen", &config.python)
            .with_base_args([config.fatfs_gen_script.display().to_string()]);

        for tool in [&flasher, &nvs_decoder] {
            if let Err(e) = tool.ensure_available() {
                log::warn!("{}", e);
            }
        }

        Ok(Self {
            flasher: Arc::new(flasher),
            nvs_decoder: Arc::new(nvs_decoder),
            nvs_generator: Arc::new(nvs_generator),
            fatfs_generator: Arc::new(fatfs_generator),
        })
    }
}
