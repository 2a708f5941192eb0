//! Model pipeline: convert, unpack, assemble, validate, image

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::ModelTypeRegistry;
use crate::errors::{ProvisionError, Result};
use crate::models::to_hex;
use crate::tools::ExternalTool;
use crate::utils::fs::reset_dir;

use super::assembly::{
    ASSEMBLY_DIR, MODEL_ARCHIVE, NETWORK_INFO, assemble, extract_archive, validate_assembly,
};
use super::converter::ModelConverter;

const MODEL_WORK_DIR: &str = "model";
const DOWNLOAD_DIR: &str = "output";
const EXTRACT_DIR: &str = "extract";
const FAT_IMAGE_FILE: &str = "storage_dl.bin";

/// A validated model directory ready to be packed into a FAT image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedModel {
    /// Directory packed into the image; contains `dnn/`
    pub assembly_root: PathBuf,
    pub dnn_dir: PathBuf,
    pub files: Vec<PathBuf>,
}

/// Runs the model pipeline inside a scratch directory
#[derive(Clone)]
pub struct ModelProvisioner {
    converter: Arc<dyn ModelConverter>,
    fatfs_generator: Arc<dyn ExternalTool>,
    registry: ModelTypeRegistry,
    work_dir: PathBuf,
}

impl ModelProvisioner {
    pub fn new(
        converter: Arc<dyn ModelConverter>,
        fatfs_generator: Arc<dyn ExternalTool>,
        registry: ModelTypeRegistry,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            converter,
            fatfs_generator,
            registry,
            work_dir: work_dir.into(),
        }
    }

    /// Convert the model type's archive for `device_id` and assemble it.
    ///
    /// Each step consumes the previous step's output; nothing is reused
    /// from an earlier run.
    pub async fn prepare(&self, device_id: &str, model_type: &str) -> Result<PreparedModel> {
        let model_work = self.device_work_dir(device_id)?;
        reset_dir(&model_work)?;

        let model_dir = self.registry.model_dir(model_type)?;
        let archive = model_dir.join(MODEL_ARCHIVE);
        if !archive.is_file() {
            return Err(ProvisionError::config(format!(
                "model archive not found: {}",
                archive.display()
            )));
        }
        let sidecar = model_dir.join(NETWORK_INFO);
        let sidecar = sidecar.is_file().then_some(sidecar);

        log::info!("Model type: {} ({})", model_type, archive.display());
        let downloaded = self
            .converter
            .convert(device_id, &archive, &model_work.join(DOWNLOAD_DIR))
            .await?;

        let content = extract_archive(&downloaded, &model_work.join(EXTRACT_DIR))?;
        let assembly_root = self.work_dir.join(ASSEMBLY_DIR);
        let dnn_dir = assemble(&content, sidecar.as_deref(), &assembly_root)?;
        let files = validate_assembly(&dnn_dir)?;

        Ok(PreparedModel {
            assembly_root,
            dnn_dir,
            files,
        })
    }

    /// Scratch directory of one device's conversion
    pub fn device_work_dir(&self, device_id: &str) -> Result<PathBuf> {
        let usable = !device_id.is_empty()
            && device_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !usable {
            return Err(ProvisionError::malformed(format!(
                "device id '{}' cannot name a work directory",
                device_id
            )));
        }
        Ok(self.work_dir.join(MODEL_WORK_DIR).join(device_id))
    }

    /// Pack the assembly into a wear-levelled FAT image of `partition_size` bytes
    pub async fn build_fat_image(&self, prepared: &PreparedModel, partition_size: u64) -> Result<PathBuf> {
        let output = self.work_dir.join(FAT_IMAGE_FILE);
        build_fat_image(
            self.fatfs_generator.as_ref(),
            &prepared.assembly_root,
            partition_size,
            &output,
        )
        .await?;
        Ok(output)
    }
}

/// Run the FAT generator over `source_dir` and check the produced image size
pub async fn build_fat_image(
    generator: &dyn ExternalTool,
    source_dir: &Path,
    partition_size: u64,
    output: &Path,
) -> Result<()> {
    if output.exists() {
        std::fs::remove_file(output)?;
    }
    let args = vec![
        source_dir.display().to_string(),
        "--output_file".to_string(),
        output.display().to_string(),
        "--partition_size".to_string(),
        to_hex(partition_size),
        "--long_name_support".to_string(),
    ];
    log::info!("Generating FAT image {} ({})", output.display(), to_hex(partition_size));

    let result = generator.run(&args).await?;
    if !result.is_success() {
        return Err(ProvisionError::ImageBuild {
            reason: format!("{} exited with {:?}", generator.name(), result.exit_code),
            output: Some(result),
        });
    }

    let size = std::fs::metadata(output).map(|m| m.len()).unwrap_or(0);
    if size == 0 {
        return Err(ProvisionError::ImageBuild {
            reason: format!("{} was not created", output.display()),
            output: Some(result),
        });
    }
    if size > partition_size {
        return Err(ProvisionError::ImageBuild {
            reason: format!(
                "image is {} bytes, larger than the {} byte partition",
                size, partition_size
            ),
            output: Some(result),
        });
    }
    log::info!("FAT image ready ({} bytes)", size);
    Ok(())
}
