//! Flash read/write and reset over the esptool command line

use regex::Regex;
use std::path::Path;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use crate::errors::{LinkOperation, ProvisionError, Result};
use crate::models::{ChipIdentity, FlashImage, FlashParams, to_hex};
use crate::tools::{ExternalTool, ToolOutput};

static CHIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Chip (?:is|type:)\s*(.+?)\s*$").expect("valid chip regex")
});

static MAC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)MAC:\s*([0-9A-Fa-f]{2}(?::[0-9A-Fa-f]{2}){5})").expect("valid MAC regex")
});

/// Extract the chip description and MAC address from flasher output
pub fn parse_chip_identity(text: &str) -> ChipIdentity {
    ChipIdentity {
        chip: CHIP_RE
            .captures(text)
            .map(|caps| caps[1].to_string()),
        mac: MAC_RE
            .captures(text)
            .map(|caps| caps[1].to_ascii_uppercase()),
    }
}

/// Bytes read from a flash region together with what the flasher reported
#[derive(Debug, Clone)]
pub struct RegionRead {
    pub data: Vec<u8>,
    pub identity: ChipIdentity,
}

impl RegionRead {
    /// MAC address reported during the read; absent means the link is unreliable
    pub fn mac(&self) -> Result<&str> {
        self.identity.mac.as_deref().ok_or_else(|| {
            ProvisionError::TransientLink(
                "flash tool did not report a MAC address during read".to_string(),
            )
        })
    }
}

/// Blocking device operations on a single serial port
#[derive(Clone)]
pub struct DeviceLink {
    flasher: Arc<dyn ExternalTool>,
    params: FlashParams,
    reset_timeout: Duration,
}

impl DeviceLink {
    pub fn new(flasher: Arc<dyn ExternalTool>, params: FlashParams, reset_timeout: Duration) -> Self {
        Self {
            flasher,
            params,
            reset_timeout,
        }
    }

    pub fn params(&self) -> &FlashParams {
        &self.params
    }

    /// Read `size` bytes at `offset` into `dest` and return them
    pub async fn read_region(
        &self,
        port: &str,
        offset: u64,
        size: u64,
        dest: &Path,
    ) -> Result<RegionRead> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if dest.exists() {
            std::fs::remove_file(dest)?;
        }

        log::info!(
            "Reading {} bytes at {} from {}",
            to_hex(size),
            to_hex(offset),
            port
        );
        let args = vec![
            "-p".to_string(),
            port.to_string(),
            "-b".to_string(),
            self.params.baud_rate.to_string(),
            "read_flash".to_string(),
            to_hex(offset),
            to_hex(size),
            dest.display().to_string(),
        ];
        let output = self.invoke(LinkOperation::ReadFlash, port, &args).await?;

        let data = std::fs::read(dest).map_err(|e| {
            ProvisionError::TransientLink(format!(
                "flash tool reported success but {} is unreadable: {}",
                dest.display(),
                e
            ))
        })?;
        if data.len() as u64 != size {
            return Err(ProvisionError::TransientLink(format!(
                "short read: expected {} bytes, got {}",
                size,
                data.len()
            )));
        }

        let identity = parse_chip_identity(&output.stdout);
        if let Some(chip) = &identity.chip {
            log::info!("Chip: {}", chip);
        }
        if let Some(mac) = &identity.mac {
            log::info!("MAC: {}", mac);
        }
        Ok(RegionRead { data, identity })
    }

    /// Write one file at `offset`
    pub async fn write_region(&self, port: &str, offset: u64, file: &Path) -> Result<()> {
        let size = std::fs::metadata(file)?.len();
        let image = FlashImage {
            partition_name: to_hex(offset),
            address: offset,
            path: file.to_path_buf(),
            size,
        };
        self.write_images(port, std::slice::from_ref(&image)).await
    }

    /// Write several images in one flasher invocation
    pub async fn write_images(&self, port: &str, images: &[FlashImage]) -> Result<()> {
        if images.is_empty() {
            return Err(ProvisionError::malformed("no images to write"));
        }

        let mut args = vec![
            "-p".to_string(),
            port.to_string(),
            "-b".to_string(),
            self.params.baud_rate.to_string(),
            "--before".to_string(),
            "default_reset".to_string(),
            "--after".to_string(),
            "hard_reset".to_string(),
            "--chip".to_string(),
            self.params.chip.clone(),
            "write_flash".to_string(),
            "--flash_mode".to_string(),
            self.params.flash_mode.clone(),
            "--flash_freq".to_string(),
            self.params.flash_freq.clone(),
            "--flash_size".to_string(),
            self.params.flash_size.clone(),
        ];
        for image in images {
            log::info!(
                "  {:<16} {:<10} {} ({} bytes)",
                image.partition_name,
                to_hex(image.address),
                image.path.display(),
                image.size
            );
            args.push(to_hex(image.address));
            args.push(image.path.display().to_string());
        }

        self.invoke(LinkOperation::WriteFlash, port, &args).await?;
        log::info!("Wrote {} image(s) to {}", images.len(), port);
        Ok(())
    }

    /// Probe the chip and return its identity
    pub async fn test_connection(&self, port: &str) -> Result<ChipIdentity> {
        let args = vec!["-p".to_string(), port.to_string(), "chip_id".to_string()];
        let output = self.invoke(LinkOperation::ChipId, port, &args).await?;
        let identity = parse_chip_identity(&output.stdout);
        log::info!(
            "Connected to {} on {}",
            identity.chip.as_deref().unwrap_or("unknown chip"),
            port
        );
        Ok(identity)
    }

    pub async fn read_mac(&self, port: &str) -> Result<String> {
        let args = vec!["-p".to_string(), port.to_string(), "read_mac".to_string()];
        let output = self.invoke(LinkOperation::ReadMac, port, &args).await?;
        parse_chip_identity(&output.stdout).mac.ok_or_else(|| {
            ProvisionError::TransientLink(format!("no MAC address in read_mac output on {}", port))
        })
    }

    /// Ask the device to run its application.
    ///
    /// The device often reboots before the tool can finish, so both a
    /// timeout and a non-zero exit are treated as a completed reset.
    pub async fn reset(&self, port: &str) -> Result<()> {
        let args = vec!["--port".to_string(), port.to_string(), "run".to_string()];
        match tokio::time::timeout(self.reset_timeout, self.flasher.run(&args)).await {
            Ok(Ok(output)) if output.is_success() => {
                log::info!("Device on {} reset", port);
            }
            Ok(Ok(output)) => {
                log::warn!(
                    "Reset command exited with {:?}; the device has most likely rebooted",
                    output.exit_code
                );
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                log::warn!(
                    "Reset command timed out after {:?}; the device has most likely rebooted",
                    self.reset_timeout
                );
            }
        }
        Ok(())
    }

    async fn invoke(
        &self,
        operation: LinkOperation,
        port: &str,
        args: &[String],
    ) -> Result<ToolOutput> {
        let output = self.flasher.run(args).await?;
        if !output.is_success() {
            return Err(ProvisionError::Link {
                operation,
                port: port.to_string(),
                output,
            });
        }
        Ok(output)
    }
}
