//! Provisioning state machine and its flows
//!
//! Every flow runs strictly in sequence on one serial port. A failure at
//! any step aborts the flow and is reported with the furthest stage
//! reached. Nothing already written to flash is rolled back.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::{BuildTypeRegistry, ModelTypeRegistry, ProvisionConfig};
use crate::device::{DeviceLink, RegionRead};
use crate::errors::{ProvisionError, Result};
use crate::model::{ModelConverter, ModelProvisioner, PreparedModel};
use crate::models::{
    DeviceClassification, DeviceProvisioningRecord, FlashImage, FlashManifest, FlashParams,
    NvsRecordSet, ProvisionEvent, ProvisioningState, RegistrationRequest, RegistrationResult,
    RunArtifact, Stage, keys,
};
use crate::nvs::{DecodeOutcome, NvsCodec};
use crate::partition::{FlashPlan, PartitionTable, STORAGE_DL_PARTITION};
use crate::registration::{RegistrationApi, register_device, save_run_artifact};
use crate::tools::{ExternalTool, Toolchain};
use crate::utils::fs::reset_dir;

use super::failure::{RunFailure, RunResult};
use super::prompt::{FixedAnswer, OperatorPrompt};

/// Raw NVS image read from the device
const NVS_READ_FILE: &str = "nvs_flash.bin";

pub const MISSING_CAMERA_ID_GUIDANCE: &str = "The device has NVS data but no valid g_camera_id. \
Power on the MS500 once so it generates its camera id, then run this step again.";

const BLANK_NVS_GUIDANCE: &str = "The NVS partition is blank. \
Run the info step and boot the device once before flashing a model.";

/// Outcome of the registration flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoOutcome {
    Registered {
        mac: String,
        result: RegistrationResult,
        /// Records written to the NVS partition
        records: NvsRecordSet,
    },
    /// Device already provisioned and the operator chose to keep it
    Skipped { mac: String },
}

/// Everything a factory run produced
#[derive(Debug, Clone)]
pub struct FactoryReport {
    pub info: InfoOutcome,
    pub firmware: Vec<FlashImage>,
    pub model: PreparedModel,
}

/// Drives provisioning flows for one device
pub struct ProvisioningOrchestrator {
    config: Arc<ProvisionConfig>,
    port: String,
    bin_type: String,
    build_types: BuildTypeRegistry,
    link: DeviceLink,
    codec: NvsCodec,
    fatfs_generator: Arc<dyn ExternalTool>,
    registration: Option<Arc<dyn RegistrationApi>>,
    model: Option<ModelProvisioner>,
    prompt: Arc<dyn OperatorPrompt>,
    events: Option<mpsc::UnboundedSender<ProvisionEvent>>,
    table_cache: Option<(String, PartitionTable)>,
    state: ProvisioningState,
    stage: Stage,
}

impl ProvisioningOrchestrator {
    pub fn new(config: Arc<ProvisionConfig>, toolchain: &Toolchain, port: impl Into<String>) -> Self {
        let link = DeviceLink::new(
            toolchain.flasher.clone(),
            FlashParams::from(&config.device),
            config.tools.reset_timeout(),
        );
        let codec = NvsCodec::new(
            toolchain.nvs_decoder.clone(),
            toolchain.nvs_generator.clone(),
            &config.paths.work_dir,
        );

        Self {
            port: port.into(),
            bin_type: config.device.bin_type.clone(),
            build_types: BuildTypeRegistry::new(&config.paths.build_types_root),
            link,
            codec,
            fatfs_generator: toolchain.fatfs_generator.clone(),
            registration: None,
            model: None,
            prompt: Arc::new(FixedAnswer(false)),
            events: None,
            table_cache: None,
            state: ProvisioningState::Reading,
            stage: Stage::Prepare,
            config,
        }
    }

    pub fn with_registration(mut self, api: Arc<dyn RegistrationApi>) -> Self {
        self.registration = Some(api);
        self
    }

    pub fn with_converter(mut self, converter: Arc<dyn ModelConverter>) -> Self {
        self.model = Some(ModelProvisioner::new(
            converter,
            self.fatfs_generator.clone(),
            ModelTypeRegistry::new(&self.config.paths.model_types_root),
            &self.config.paths.work_dir,
        ));
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn OperatorPrompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<ProvisionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Furthest stage reached by the current or last flow
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Partition table of the current build type, parsed once per build type
    pub fn partition_table(&mut self) -> Result<PartitionTable> {
        if let Some((bin_type, table)) = &self.table_cache {
            if *bin_type == self.bin_type {
                return Ok(table.clone());
            }
        }
        let table = PartitionTable::load_for_build(
            &self.build_types,
            &self.bin_type,
            self.config.device.flash_size_bytes(),
        )?;
        self.table_cache = Some((self.bin_type.clone(), table.clone()));
        Ok(table)
    }

    /// Read the NVS partition, register the device and write its new NVS image
    pub async fn provision_info(&mut self) -> RunResult<InfoOutcome> {
        let result = self.run_info().await;
        self.finish("info", result)
    }

    /// Write every firmware image of the build type
    pub async fn flash_firmware(&mut self) -> RunResult<Vec<FlashImage>> {
        let result = self.run_firmware().await;
        self.finish("firmware", result)
    }

    /// Convert, image and flash the model, then set the model update flag and reset
    pub async fn flash_model(&mut self) -> RunResult<PreparedModel> {
        let result = self.run_model().await;
        self.finish("model", result)
    }

    /// Add `is_model_update=1` to the device's NVS keeping every other key
    pub async fn set_model_flag(&mut self, reset: bool) -> RunResult<NvsRecordSet> {
        let result = self.run_flag(reset).await;
        self.finish("flag", result)
    }

    /// info, then firmware, then model; stops at the first failure
    pub async fn factory(&mut self) -> RunResult<FactoryReport> {
        let info = self.provision_info().await?;
        let firmware = self.flash_firmware().await?;
        let model = self.flash_model().await?;
        Ok(FactoryReport {
            info,
            firmware,
            model,
        })
    }

    async fn run_info(&mut self) -> Result<InfoOutcome> {
        self.begin()?;
        let table = self.partition_table()?;
        let (read, classification) = self.read_device(&table).await?;
        let existing = match classification {
            DeviceClassification::ProvisionedInvalid(_) => {
                return Err(self.missing_camera_id());
            }
            DeviceClassification::Unprovisioned => None,
            DeviceClassification::ProvisionedValid(record) => Some(record),
        };

        let mac = self.device_mac(&read).await?;
        self.emit(ProvisionEvent::Output(format!("MAC: {}", mac)));

        let mut record = match existing {
            None => DeviceProvisioningRecord::blank(),
            Some(record) => {
                log::info!("Device already provisioned with a valid g_camera_id");
                if !self.prompt.confirm_reprovision(&record).await {
                    log::info!("Re-registration declined; leaving the device unchanged");
                    self.transition(ProvisioningState::Done)?;
                    self.enter(Stage::Done);
                    return Ok(InfoOutcome::Skipped { mac });
                }
                record
            }
        };

        self.transition(ProvisioningState::Registering)?;
        self.enter(Stage::Register);
        let api = self
            .registration
            .clone()
            .ok_or_else(|| ProvisionError::config("no registration client configured"))?;
        let request = self.registration_request(record.g_camera_id())?;
        let result = register_device(api.as_ref(), &request).await?;
        save_run_artifact(
            &self.config.paths.run_artifact,
            &RunArtifact::new(&request, result.clone()),
        )?;

        self.transition(ProvisioningState::Merging)?;
        self.enter(Stage::Merge);
        record.apply(&result.to_records(&request, Some(&mac)));
        self.write_nvs(&table, record.records()).await?;

        self.complete();
        Ok(InfoOutcome::Registered {
            mac,
            result,
            records: record.into_records(),
        })
    }

    async fn run_firmware(&mut self) -> Result<Vec<FlashImage>> {
        self.begin()?;
        let table = self.partition_table()?;
        let build_dir = self.build_types.build_dir(&self.bin_type)?;
        let plan = FlashPlan::resolve(&FlashManifest::ms500(), &table, &build_dir)?;
        log::info!(
            "Flashing {} image(s) from {}",
            plan.len(),
            build_dir.display()
        );

        self.transition(ProvisioningState::Flashing)?;
        self.enter(Stage::Flash);
        self.link.test_connection(&self.port).await?;
        self.link.write_images(&self.port, plan.images()).await?;

        self.complete();
        Ok(plan.into_images())
    }

    async fn run_model(&mut self) -> Result<PreparedModel> {
        self.begin()?;
        let table = self.partition_table()?;
        let storage_dl = table.storage_dl()?.clone();
        let provisioner = self
            .model
            .clone()
            .ok_or_else(|| ProvisionError::config("no model converter configured"))?;

        let (_, classification) = self.read_device(&table).await?;
        let record = self.require_valid(classification)?;
        let device_id = record
            .g_camera_id()
            .ok_or_else(|| self.missing_camera_id())?;

        self.transition(ProvisioningState::ModelPending)?;
        self.enter(Stage::ConvertModel);
        let prepared = provisioner
            .prepare(&device_id, &self.config.device.model_type)
            .await?;

        self.enter(Stage::BuildImage);
        let image = provisioner
            .build_fat_image(&prepared, storage_dl.size)
            .await?;

        self.transition(ProvisioningState::Flashing)?;
        self.enter(Stage::Flash);
        let plan = FlashPlan::single(&table, STORAGE_DL_PARTITION, &image)?;
        self.link.write_images(&self.port, plan.images()).await?;

        self.transition(ProvisioningState::Merging)?;
        self.enter(Stage::Merge);
        self.apply_model_flag(&table, record).await?;

        self.enter(Stage::Reset);
        self.link.reset(&self.port).await?;
        self.complete();
        Ok(prepared)
    }

    async fn run_flag(&mut self, reset: bool) -> Result<NvsRecordSet> {
        self.begin()?;
        let table = self.partition_table()?;
        let (_, classification) = self.read_device(&table).await?;
        let record = self.require_valid(classification)?;

        self.transition(ProvisioningState::Merging)?;
        self.enter(Stage::Merge);
        let records = self.apply_model_flag(&table, record).await?;

        if reset {
            self.enter(Stage::Reset);
            self.link.reset(&self.port).await?;
        }
        self.complete();
        Ok(records)
    }

    async fn read_device(
        &mut self,
        table: &PartitionTable,
    ) -> Result<(RegionRead, DeviceClassification)> {
        self.enter(Stage::ReadNvs);
        let nvs = table.nvs()?;
        let dest = self.work_dir().join(NVS_READ_FILE);
        let read = self
            .link
            .read_region(&self.port, nvs.offset, nvs.size, &dest)
            .await?;

        self.enter(Stage::Decode);
        let outcome = self.codec.decode(&read.data).await?;

        self.enter(Stage::Classify);
        let classification = match outcome {
            DecodeOutcome::Blank => DeviceClassification::Unprovisioned,
            DecodeOutcome::Decoded(records) => {
                DeviceClassification::from_record(DeviceProvisioningRecord::from_records(records))
            }
        };
        self.transition(classification.state())?;
        Ok((read, classification))
    }

    /// MAC printed during the NVS read, or queried with `read_mac` when the read printed none
    async fn device_mac(&self, read: &RegionRead) -> Result<String> {
        match read.mac() {
            Ok(mac) => Ok(mac.to_string()),
            Err(e) => {
                log::warn!("{}; asking the device with read_mac", e);
                self.link.read_mac(&self.port).await
            }
        }
    }

    fn require_valid(
        &self,
        classification: DeviceClassification,
    ) -> Result<DeviceProvisioningRecord> {
        match classification {
            DeviceClassification::ProvisionedValid(record) => Ok(record),
            DeviceClassification::Unprovisioned => {
                self.emit(ProvisionEvent::Guidance(BLANK_NVS_GUIDANCE.to_string()));
                Err(ProvisionError::precondition("NVS partition is blank"))
            }
            DeviceClassification::ProvisionedInvalid(_) => Err(self.missing_camera_id()),
        }
    }

    async fn apply_model_flag(
        &mut self,
        table: &PartitionTable,
        mut record: DeviceProvisioningRecord,
    ) -> Result<NvsRecordSet> {
        let update: NvsRecordSet = [(keys::IS_MODEL_UPDATE, "1")].into_iter().collect();
        record.apply(&update);
        log::info!("Setting {}=1", keys::IS_MODEL_UPDATE);
        self.write_nvs(table, record.records()).await?;
        Ok(record.into_records())
    }

    /// Encode records to the NVS partition size and flash them
    async fn write_nvs(&mut self, table: &PartitionTable, records: &NvsRecordSet) -> Result<()> {
        self.transition(ProvisioningState::Encoding)?;
        self.enter(Stage::Encode);
        let nvs = table.nvs()?;
        let image = self.codec.encode_to_file(records, nvs.size).await?;

        self.transition(ProvisioningState::Flashing)?;
        self.enter(Stage::Flash);
        self.link.write_region(&self.port, nvs.offset, &image).await
    }

    fn registration_request(&self, g_camera_id: Option<String>) -> Result<RegistrationRequest> {
        let registration = &self.config.registration;
        registration.require_identity()?;
        Ok(RegistrationRequest {
            server_url: registration.server_url.clone(),
            c_sn: registration.c_sn.clone(),
            u_sn: registration.u_sn.clone(),
            u_url: registration.u_url.clone(),
            g_camera_id,
        })
    }

    fn missing_camera_id(&self) -> ProvisionError {
        self.emit(ProvisionEvent::Guidance(
            MISSING_CAMERA_ID_GUIDANCE.to_string(),
        ));
        ProvisionError::precondition("g_camera_id missing or invalid")
    }

    fn work_dir(&self) -> PathBuf {
        self.config.paths.work_dir.clone()
    }

    /// Start a flow from a clean working directory
    fn begin(&mut self) -> Result<()> {
        self.state = ProvisioningState::Reading;
        self.stage = Stage::Prepare;
        self.emit(ProvisionEvent::StageStarted(Stage::Prepare));
        reset_dir(&self.config.paths.work_dir)
    }

    fn enter(&mut self, stage: Stage) {
        if self.stage != stage {
            self.emit(ProvisionEvent::StageCompleted(self.stage));
        }
        log::debug!("Stage: {}", stage);
        self.stage = stage;
        self.emit(ProvisionEvent::StageStarted(stage));
    }

    fn transition(&mut self, next: ProvisioningState) -> Result<()> {
        let next = self.state.transition_to(next)?;
        log::debug!("State: {} -> {}", self.state, next);
        self.state = next;
        self.emit(ProvisionEvent::StateChanged(next));
        Ok(())
    }

    fn complete(&mut self) {
        // Done is reachable from Flashing and from ProvisionedValid only
        if self.state.can_transition_to(ProvisioningState::Done) {
            self.state = ProvisioningState::Done;
            self.emit(ProvisionEvent::StateChanged(ProvisioningState::Done));
        }
        self.enter(Stage::Done);
    }

    fn finish<T>(&mut self, flow: &'static str, result: Result<T>) -> RunResult<T> {
        result.map_err(|error| {
            log::error!("{} flow failed at stage '{}': {}", flow, self.stage, error);
            if !self.state.is_terminal() {
                self.state = ProvisioningState::Aborted;
                self.emit(ProvisionEvent::StateChanged(ProvisioningState::Aborted));
            }
            RunFailure {
                flow,
                stage: self.stage,
                error,
            }
        })
    }

    fn emit(&self, event: ProvisionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }
}
