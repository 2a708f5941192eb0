//! End-to-end provisioning flows against a simulated device


use std::sync::Arc;
use tokio::sync::mpsc;

use mock_device::{
    MOCK_MAC, MockConverter, MockDevice, MockFatGenerator, MockRegistry, decode_image,
    mock_toolchain, nvs_image,
};
use ms500_provision::errors::ErrorKind;
use ms500_provision::models::{NvsRecordSet, ProvisionEvent, ProvisioningState, Stage, keys};
use ms500_provision::orchestrator::{
    FixedAnswer, InfoOutcome, MISSING_CAMERA_ID_GUIDANCE, ProvisioningOrchestrator,
};
use ms500_provision::registration::{derive_password, load_run_artifact};
use test_fixtures::*;

const PORT: &str = "/dev/ttyUSB0";

struct Harness {
    station: TestStation,
    device: MockDevice,
    fat: MockFatGenerator,
    registry: Arc<MockRegistry>,
    converter: Arc<MockConverter>,
}

impl Harness {
    fn new(device: MockDevice) -> Self {
        Self {
            station: TestStation::new(),
            device,
            fat: MockFatGenerator::default(),
            registry: Arc::new(MockRegistry::default()),
            converter: Arc::new(MockConverter::new(&[
                ("packerOut/ped_alarm.fpk", b"FPK model body"),
                ("packerOut/network_info.txt", b"converted network info"),
                ("packerOut/packer.log", b"packing done"),
            ])),
        }
    }

    fn blank() -> Self {
        Self::new(MockDevice::new())
    }

    fn provisioned(records: &NvsRecordSet) -> Self {
        Self::new(MockDevice::new().with_region(NVS_OFFSET, nvs_image(records, NVS_SIZE)))
    }

    fn orchestrator(&self, reprovision: bool) -> ProvisioningOrchestrator {
        let toolchain = mock_toolchain(&self.device, &self.fat);
        ProvisioningOrchestrator::new(Arc::new(self.station.config.clone()), &toolchain, PORT)
            .with_registration(self.registry.clone())
            .with_converter(self.converter.clone())
            .with_prompt(Arc::new(FixedAnswer(reprovision)))
    }

    fn nvs_records(&self) -> NvsRecordSet {
        decode_image(&self.device.region(NVS_OFFSET).expect("NVS was never written"))
    }
}

fn drain(mut rx: mpsc::UnboundedReceiver<ProvisionEvent>) -> Vec<ProvisionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_blank_device_is_registered() {
    let harness = Harness::blank();
    let mut orchestrator = harness.orchestrator(false);

    let outcome = orchestrator.provision_info().await.unwrap();
    assert_eq!(orchestrator.state(), ProvisioningState::Done);

    let InfoOutcome::Registered { mac, result, .. } = outcome else {
        panic!("blank device must be registered");
    };
    assert_eq!(mac, MOCK_MAC);
    assert_eq!(result.u_camera_id, 101);
    assert_eq!(result.u_unit_id, 202);
    assert_eq!(result.u_account_id, 303);
    assert_eq!(result.device_token, "device-token-404");
    assert_eq!(result.password, derive_password(U_SN));

    assert_eq!(
        harness.registry.calls(),
        vec![
            format!("query {}", C_SN),
            format!("camera {} -", C_SN),
            format!("unit {} 101", U_SN),
            format!("account {}", U_SN),
            format!("auth {}", U_SN),
        ]
    );

    let image = harness.device.region(NVS_OFFSET).unwrap();
    assert_eq!(image.len() as u64, NVS_SIZE);

    let nvs = harness.nvs_records();
    assert_eq!(nvs.get_string(keys::C_SN).as_deref(), Some(C_SN));
    assert_eq!(nvs.get_string(keys::U_SN).as_deref(), Some(U_SN));
    assert_eq!(nvs.get_string(keys::U_CAMERA_ID).as_deref(), Some("101"));
    assert_eq!(nvs.get_string(keys::U_UNIT_ID).as_deref(), Some("202"));
    assert_eq!(nvs.get_string(keys::U_ACCOUNT_ID).as_deref(), Some("303"));
    assert_eq!(nvs.get_string(keys::DEVICE_TOKEN).as_deref(), Some("device-token-404"));
    assert_eq!(nvs.get_string(keys::SERVER_URL).as_deref(), Some(SERVER_URL));
    assert_eq!(nvs.get_string(keys::MAC).as_deref(), Some(MOCK_MAC));
    assert!(!nvs.contains_key(keys::G_CAMERA_ID));
    assert!(!nvs.contains_key(keys::C_SENSOR));

    let artifact = load_run_artifact(&harness.station.config.paths.run_artifact).unwrap();
    assert_eq!(artifact.request.c_sn, C_SN);
    assert_eq!(artifact.response, result);
}

#[tokio::test]
async fn test_registered_device_without_camera_id_needs_boot() {
    let harness = Harness::blank();
    harness.orchestrator(false).provision_info().await.unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let mut orchestrator = harness.orchestrator(true).with_events(tx);
    let failure = orchestrator.provision_info().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Precondition);
    assert_eq!(failure.stage, Stage::Classify);
    assert_eq!(orchestrator.state(), ProvisioningState::Aborted);

    drop(orchestrator);
    let events = drain(rx);
    assert!(events.contains(&ProvisionEvent::Guidance(
        MISSING_CAMERA_ID_GUIDANCE.to_string()
    )));
    // The registry was only contacted by the first run
    assert_eq!(harness.registry.calls().len(), 5);
}

#[tokio::test]
async fn test_provisioned_device_kept_when_declined() {
    let harness = Harness::provisioned(&provisioned_records());
    let mut orchestrator = harness.orchestrator(false);

    let outcome = orchestrator.provision_info().await.unwrap();
    assert_eq!(
        outcome,
        InfoOutcome::Skipped {
            mac: MOCK_MAC.to_string()
        }
    );
    assert_eq!(orchestrator.state(), ProvisioningState::Done);
    assert!(harness.registry.calls().is_empty());
    assert!(harness.device.written_addresses().is_empty());
}

#[tokio::test]
async fn test_reprovision_binds_sensor_and_keeps_other_keys() {
    let harness = Harness::provisioned(&provisioned_records());
    let mut orchestrator = harness.orchestrator(true);

    let outcome = orchestrator.provision_info().await.unwrap();
    assert!(matches!(outcome, InfoOutcome::Registered { .. }));
    assert_eq!(
        harness.registry.calls()[1],
        format!("camera {} {}", C_SN, CAMERA_ID)
    );

    let nvs = harness.nvs_records();
    assert_eq!(nvs.get_string(keys::G_CAMERA_ID).as_deref(), Some(CAMERA_ID));
    assert_eq!(nvs.get_string(keys::C_SENSOR).as_deref(), Some(CAMERA_ID));
    assert_eq!(nvs.get_string(keys::U_CAMERA_ID).as_deref(), Some("101"));
    assert_eq!(nvs.get_string(keys::DEVICE_TOKEN).as_deref(), Some("device-token-404"));
    assert_eq!(nvs.get_string("wake_count").as_deref(), Some("3"));
}

#[tokio::test]
async fn test_existing_camera_aborts_before_writing() {
    let mut harness = Harness::blank();
    harness.registry = Arc::new(MockRegistry {
        existing_camera: Some(55),
        ..MockRegistry::default()
    });
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.provision_info().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::RemoteRejection);
    assert_eq!(failure.stage, Stage::Register);
    assert_eq!(harness.registry.calls(), vec![format!("query {}", C_SN)]);
    assert!(harness.device.region(NVS_OFFSET).is_none());
    assert!(!harness.station.config.paths.run_artifact.exists());
}

#[tokio::test]
async fn test_rejected_unit_is_reported() {
    let mut harness = Harness::blank();
    harness.registry = Arc::new(MockRegistry {
        reject_unit: true,
        ..MockRegistry::default()
    });
    let failure = harness
        .orchestrator(false)
        .provision_info()
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::RemoteRejection);
    assert!(failure.to_string().contains("already exists"));
    assert!(harness.device.written_addresses().is_empty());
}

#[tokio::test]
async fn test_mac_is_queried_when_read_omits_it() {
    let harness = Harness::new(
        MockDevice::new()
            .with_region(NVS_OFFSET, nvs_image(&provisioned_records(), NVS_SIZE))
            .without_mac_in_reads(),
    );
    let outcome = harness.orchestrator(false).provision_info().await.unwrap();
    assert_eq!(
        outcome,
        InfoOutcome::Skipped {
            mac: MOCK_MAC.to_string()
        }
    );
    assert_eq!(harness.device.verbs(), vec!["read_flash", "read_mac"]);
}

#[tokio::test]
async fn test_missing_mac_is_transient() {
    let harness = Harness::new(MockDevice::new().without_mac_in_reads());
    harness.device.fail_on("read_mac");
    let failure = harness
        .orchestrator(false)
        .provision_info()
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::TransientLink);
    assert!(harness.registry.calls().is_empty());
    assert!(harness.device.written_addresses().is_empty());
}

#[tokio::test]
async fn test_device_without_camera_id_gets_boot_guidance_before_mac_check() {
    let mut records = NvsRecordSet::new();
    for record in provisioned_records()
        .iter()
        .filter(|r| r.key() != keys::G_CAMERA_ID)
    {
        records.insert(record.key(), record.value().clone());
    }
    let harness = Harness::new(
        MockDevice::new()
            .with_region(NVS_OFFSET, nvs_image(&records, NVS_SIZE))
            .without_mac_in_reads(),
    );
    harness.device.fail_on("read_mac");

    let failure = harness
        .orchestrator(true)
        .provision_info()
        .await
        .unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Precondition);
    assert_eq!(failure.stage, Stage::Classify);
    assert_eq!(harness.device.verbs(), vec!["read_flash"]);
}

#[tokio::test]
async fn test_read_failure_is_transient() {
    let harness = Harness::blank();
    harness.device.fail_on("read_flash");
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.provision_info().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::TransientLink);
    assert_eq!(failure.stage, Stage::ReadNvs);
    assert_eq!(orchestrator.state(), ProvisioningState::Aborted);
    assert!(harness.registry.calls().is_empty());
}

#[tokio::test]
async fn test_model_flag_preserves_existing_keys() {
    let harness = Harness::provisioned(&provisioned_records());
    let mut orchestrator = harness.orchestrator(false);

    let records = orchestrator.set_model_flag(true).await.unwrap();
    assert_eq!(records.get_string(keys::IS_MODEL_UPDATE).as_deref(), Some("1"));
    assert_eq!(harness.device.resets(), 1);
    assert_eq!(harness.device.written_addresses(), vec![NVS_OFFSET]);

    let nvs = harness.nvs_records();
    assert_eq!(nvs.len(), provisioned_records().len() + 1);
    for record in provisioned_records().iter() {
        assert_eq!(
            nvs.get_string(record.key()),
            Some(record.value().to_string()),
            "key {} changed",
            record.key()
        );
    }
    assert_eq!(nvs.get_string(keys::IS_MODEL_UPDATE).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_model_flag_without_reset() {
    let harness = Harness::provisioned(&provisioned_records());
    harness
        .orchestrator(false)
        .set_model_flag(false)
        .await
        .unwrap();
    assert_eq!(harness.device.resets(), 0);
}

#[tokio::test]
async fn test_model_flag_on_blank_device_fails() {
    let harness = Harness::blank();
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.set_model_flag(true).await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::Precondition);
    assert_eq!(failure.stage, Stage::Classify);
    assert!(harness.device.written_addresses().is_empty());
    assert_eq!(harness.device.resets(), 0);
}

#[tokio::test]
async fn test_firmware_images_follow_partition_table() {
    let harness = Harness::blank();
    let mut orchestrator = harness.orchestrator(false);

    let images = orchestrator.flash_firmware().await.unwrap();
    let names: Vec<&str> = images.iter().map(|i| i.partition_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["bootloader", "partition-table", "otadata", "ota_0", "storage"]
    );
    assert_eq!(
        harness.device.written_addresses(),
        vec![0x2000, 0x8000, 0xf000, 0x20000, 0x320000]
    );
    assert_eq!(harness.device.verbs(), vec!["chip_id", "write_flash"]);
    assert_eq!(orchestrator.state(), ProvisioningState::Done);
}

#[tokio::test]
async fn test_firmware_addresses_from_compiled_table() {
    let harness = Harness::blank();
    let build_dir = harness.station.build_dir();
    std::fs::remove_file(build_dir.join("partitions.csv")).unwrap();
    let compiled = esp_idf_part::PartitionTable::try_from_str(PARTITIONS_CSV)
        .unwrap()
        .to_bin()
        .unwrap();
    std::fs::write(build_dir.join("partition-table.bin"), compiled).unwrap();

    harness.orchestrator(false).flash_firmware().await.unwrap();
    assert_eq!(
        harness.device.written_addresses(),
        vec![0x2000, 0x8000, 0xf000, 0x20000, 0x320000]
    );
}

#[tokio::test]
async fn test_firmware_write_failure_risks_partial_write() {
    let harness = Harness::blank();
    harness.device.fail_on("write_flash");
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.flash_firmware().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::PartialWriteRisk);
    assert_eq!(failure.stage, Stage::Flash);
    assert!(failure.error.tool_output().is_some());
}

#[tokio::test]
async fn test_model_is_converted_flashed_and_flagged() {
    let harness = Harness::provisioned(&provisioned_records());
    let mut orchestrator = harness.orchestrator(false);

    let prepared = orchestrator.flash_model().await.unwrap();
    assert_eq!(harness.converter.devices(), vec![CAMERA_ID.to_string()]);
    assert_eq!(
        harness.converter.output_dirs(),
        vec![
            harness
                .station
                .config
                .paths
                .work_dir
                .join("model")
                .join(CAMERA_ID)
                .join("output")
        ]
    );

    let names: Vec<String> = prepared
        .files
        .iter()
        .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["network_info.txt", "ped_alarm.fpk"]);
    assert_eq!(
        harness.fat.packed(),
        vec!["dnn/network_info.txt", "dnn/ped_alarm.fpk"]
    );
    // The station's sidecar wins over the converted one
    let info = std::fs::read_to_string(prepared.dnn_dir.join("network_info.txt")).unwrap();
    assert_eq!(info, "ped_alarm network v2\n");

    assert_eq!(
        harness.device.written_addresses(),
        vec![STORAGE_DL_OFFSET, NVS_OFFSET]
    );
    assert_eq!(
        harness.device.region(STORAGE_DL_OFFSET).unwrap().len() as u64,
        STORAGE_DL_SIZE
    );
    let nvs = harness.nvs_records();
    assert_eq!(nvs.get_string(keys::IS_MODEL_UPDATE).as_deref(), Some("1"));
    assert_eq!(harness.device.resets(), 1);
}

#[tokio::test]
async fn test_wrong_camera_id_prefix_is_corrected_end_to_end() {
    let mut records = provisioned_records();
    records.insert(keys::G_CAMERA_ID, "200B50501A2101059064011000000000");
    let harness = Harness::provisioned(&records);

    harness.orchestrator(false).flash_model().await.unwrap();
    assert_eq!(harness.converter.devices(), vec![CAMERA_ID.to_string()]);

    let nvs = harness.nvs_records();
    assert_eq!(nvs.get_string(keys::G_CAMERA_ID).as_deref(), Some(CAMERA_ID));
    assert_eq!(nvs.get_string(keys::IS_MODEL_UPDATE).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_model_without_package_is_rejected() {
    let mut harness = Harness::provisioned(&provisioned_records());
    harness.converter = Arc::new(MockConverter::new(&[(
        "packerOut/network_info.txt",
        b"converted network info",
    )]));
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.flash_model().await.unwrap_err();
    assert_eq!(failure.kind(), ErrorKind::MalformedData);
    assert_eq!(failure.stage, Stage::ConvertModel);
    assert!(harness.device.written_addresses().is_empty());
    assert_eq!(harness.device.resets(), 0);
}

#[tokio::test]
async fn test_factory_stops_at_model_until_device_boots() {
    let harness = Harness::blank();
    let mut orchestrator = harness.orchestrator(false);

    let failure = orchestrator.factory().await.unwrap_err();
    assert_eq!(failure.flow, "model");
    assert_eq!(failure.kind(), ErrorKind::Precondition);

    // info and firmware completed before the model step
    let nvs = harness.nvs_records();
    assert_eq!(nvs.get_string(keys::U_UNIT_ID).as_deref(), Some("202"));
    assert!(harness.device.written_addresses().contains(&0x20000));
    assert!(harness.converter.devices().is_empty());
}
