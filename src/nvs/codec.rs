//! NVS image decode/encode through the external ESP-IDF tools

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::errors::{ProvisionError, Result};
use crate::models::{NvsRecordSet, to_hex};
use crate::tools::ExternalTool;

use super::csv::render_csv;
use super::dump::{is_blank, parse_dump};

const READ_IMAGE_FILE: &str = "nvs_read.bin";
const CSV_FILE: &str = "nvs.csv";
const ENCODED_IMAGE_FILE: &str = "nvs.bin";

/// Result of decoding an NVS partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// The partition is erased; the device was never provisioned
    Blank,
    Decoded(NvsRecordSet),
}

/// Decoder and generator pair working inside one scratch directory
#[derive(Clone)]
pub struct NvsCodec {
    decoder: Arc<dyn ExternalTool>,
    generator: Arc<dyn ExternalTool>,
    work_dir: PathBuf,
}

impl NvsCodec {
    pub fn new(
        decoder: Arc<dyn ExternalTool>,
        generator: Arc<dyn ExternalTool>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            decoder,
            generator,
            work_dir: work_dir.into(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Decode a raw partition image.
    ///
    /// A blank image is reported as [`DecodeOutcome::Blank`] without running
    /// the decoder. A decoder failure or an empty dump is an error.
    pub async fn decode(&self, image: &[u8]) -> Result<DecodeOutcome> {
        if is_blank(image) {
            log::info!("NVS partition is blank");
            return Ok(DecodeOutcome::Blank);
        }

        std::fs::create_dir_all(&self.work_dir)?;
        let image_path = self.work_dir.join(READ_IMAGE_FILE);
        std::fs::write(&image_path, image)?;
        self.decode_file(&image_path).await
    }

    /// Decode an image already on disk
    pub async fn decode_file(&self, image_path: &Path) -> Result<DecodeOutcome> {
        let image = std::fs::read(image_path)?;
        if is_blank(&image) {
            log::info!("NVS partition is blank");
            return Ok(DecodeOutcome::Blank);
        }

        let args = vec![
            image_path.display().to_string(),
            "-d".to_string(),
            "minimal".to_string(),
        ];
        let output = self.decoder.run(&args).await?;
        if !output.is_success() {
            return Err(ProvisionError::Decode {
                reason: format!("{} exited with {:?}", self.decoder.name(), output.exit_code),
                output: Some(output),
            });
        }

        let records = parse_dump(&output.stdout);
        if records.is_empty() {
            return Err(ProvisionError::Decode {
                reason: "decoder produced no entries".to_string(),
                output: Some(output),
            });
        }

        log::info!("Decoded {} NVS entries", records.len());
        for record in records.iter() {
            log::debug!("  {} ({}) = {}", record.key(), record.nvs_type(), record.value());
        }
        Ok(DecodeOutcome::Decoded(records))
    }

    /// Encode records into an image file of exactly `target_size` bytes
    pub async fn encode_to_file(&self, records: &NvsRecordSet, target_size: u64) -> Result<PathBuf> {
        let csv = render_csv(records)?;

        std::fs::create_dir_all(&self.work_dir)?;
        let csv_path = self.work_dir.join(CSV_FILE);
        let image_path = self.work_dir.join(ENCODED_IMAGE_FILE);
        std::fs::write(&csv_path, csv)?;
        if image_path.exists() {
            std::fs::remove_file(&image_path)?;
        }

        let args = vec![
            "generate".to_string(),
            csv_path.display().to_string(),
            image_path.display().to_string(),
            to_hex(target_size),
        ];
        let output = self.generator.run(&args).await?;
        if !output.is_success() {
            return Err(ProvisionError::Encode {
                reason: format!(
                    "{} exited with {:?}",
                    self.generator.name(),
                    output.exit_code
                ),
                output: Some(output),
            });
        }

        let produced = match std::fs::metadata(&image_path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                return Err(ProvisionError::Encode {
                    reason: format!("{} was not created", image_path.display()),
                    output: Some(output),
                });
            }
        };
        if produced != target_size {
            return Err(ProvisionError::Encode {
                reason: format!(
                    "image is {} bytes, expected {} bytes",
                    produced, target_size
                ),
                output: Some(output),
            });
        }

        log::info!(
            "Generated NVS image {} ({} entries, {})",
            image_path.display(),
            records.len(),
            to_hex(target_size)
        );
        Ok(image_path)
    }

    /// Encode records and return the image bytes
    pub async fn encode(&self, records: &NvsRecordSet, target_size: u64) -> Result<Vec<u8>> {
        let path = self.encode_to_file(records, target_size).await?;
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Decoder fake returning a fixed output
    struct CannedTool {
        output: ToolOutput,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl CannedTool {
        fn new(output: ToolOutput) -> Arc<Self> {
            Arc::new(Self {
                output,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ExternalTool for CannedTool {
        fn name(&self) -> &str {
            "canned"
        }

        async fn run(&self, args: &[String]) -> Result<ToolOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            Ok(self.output.clone())
        }
    }

    /// Generator fake writing a zero-filled image of the requested size
    struct SizedGenerator {
        size_override: Option<u64>,
    }

    #[async_trait]
    impl ExternalTool for SizedGenerator {
        fn name(&self) -> &str {
            "generator"
        }

        async fn run(&self, args: &[String]) -> Result<ToolOutput> {
            let size = u64::from_str_radix(args[3].trim_start_matches("0x"), 16).unwrap();
            let size = self.size_override.unwrap_or(size);
            std::fs::write(&args[2], vec![0u8; size as usize]).unwrap();
            Ok(ToolOutput::success("Created NVS binary"))
        }
    }

    fn codec(decoder: Arc<dyn ExternalTool>, dir: &TempDir) -> NvsCodec {
        NvsCodec::new(
            decoder,
            Arc::new(SizedGenerator {
                size_override: None,
            }),
            dir.path(),
        )
    }

    #[tokio::test]
    async fn test_blank_image_skips_decoder() {
        let dir = TempDir::new().unwrap();
        let decoder = CannedTool::new(ToolOutput::failed(1, "", "should not run"));
        let codec = codec(decoder.clone(), &dir);

        let outcome = codec.decode(&vec![0xFF; 0x6000]).await.unwrap();
        assert_eq!(outcome, DecodeOutcome::Blank);
        assert!(decoder.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_decoder_failure_is_not_blank() {
        let dir = TempDir::new().unwrap();
        let decoder = CannedTool::new(ToolOutput::failed(1, "", "Traceback: bad page"));
        let codec = codec(decoder, &dir);

        let err = codec.decode(&[0u8; 512]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Decode { .. }));
        assert!(err.to_string().contains("Traceback: bad page"));
    }

    #[tokio::test]
    async fn test_empty_dump_is_decode_error() {
        let dir = TempDir::new().unwrap();
        let decoder = CannedTool::new(ToolOutput::success("Page no. 0, Status: Empty\n"));
        let err = codec(decoder, &dir).decode(&[0u8; 512]).await.unwrap_err();
        assert!(err.to_string().contains("no entries"));
    }

    #[tokio::test]
    async fn test_decode_passes_minimal_flag() {
        let dir = TempDir::new().unwrap();
        let decoder = CannedTool::new(ToolOutput::success("factory:wake_count = 3\n"));
        let codec = codec(decoder.clone(), &dir);

        let outcome = codec.decode(&[0u8; 512]).await.unwrap();
        match outcome {
            DecodeOutcome::Decoded(records) => {
                assert_eq!(records.get_string("wake_count").as_deref(), Some("3"))
            }
            DecodeOutcome::Blank => panic!("expected decoded records"),
        }
        let calls = decoder.calls.lock().unwrap();
        assert_eq!(&calls[0][1..], &["-d".to_string(), "minimal".to_string()]);
    }

    #[tokio::test]
    async fn test_encode_produces_target_size() {
        let dir = TempDir::new().unwrap();
        let codec = codec(CannedTool::new(ToolOutput::success("")), &dir);
        let records: NvsRecordSet = [("wake_count", "3")].into_iter().collect();

        let bytes = codec.encode(&records, 0x6000).await.unwrap();
        assert_eq!(bytes.len(), 0x6000);
        let csv = std::fs::read_to_string(dir.path().join(CSV_FILE)).unwrap();
        assert!(csv.ends_with("wake_count,data,u32,3\n"));
    }

    #[tokio::test]
    async fn test_encode_rejects_wrong_size() {
        let dir = TempDir::new().unwrap();
        let codec = NvsCodec::new(
            CannedTool::new(ToolOutput::success("")),
            Arc::new(SizedGenerator {
                size_override: Some(0x1000),
            }),
            dir.path(),
        );
        let records: NvsRecordSet = [("wake_count", "3")].into_iter().collect();
        let err = codec.encode(&records, 0x6000).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Encode { .. }));
    }
}
