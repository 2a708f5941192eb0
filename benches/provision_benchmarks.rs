//! Benchmarks for the parsing and merging done on every provisioning run

use criterion::{Criterion, criterion_group, criterion_main};
use ms500_provision::models::{DeviceProvisioningRecord, NvsRecordSet, NvsValue};
use ms500_provision::nvs::{parse_dump, render_csv};
use ms500_provision::partition::PartitionTable;
use std::hint::black_box;

const PARTITIONS_CSV: &str = "\
# Name,     Type, SubType, Offset,   Size,     Flags
nvs,        data, nvs,     0x9000,   0x6000,
otadata,    data, ota,     0xf000,   0x2000,
phy_init,   data, phy,     0x11000,  0x1000,
ota_0,      app,  ota_0,   0x20000,  0x300000,
ota_1,      app,  ota_1,   ,         0x300000,
storage,    data, fat,     ,         0x100000,
storage_dl, data, fat,     ,         0x200000,
";

fn sample_dump() -> String {
    let mut dump = String::from("Page no. 0, Status: Full\n");
    dump.push_str("factory:g_camera_id = b'100B50501A2101059064011000000000\\x00'\n");
    dump.push_str("factory:c_sn = b'C500P4000123\\x00'\n");
    dump.push_str("factory:u_sn = b'U500P4000123\\x00'\n");
    dump.push_str("factory:device_token = b'9944b09199c62bcf9418ad846dd0e4bbdfc6ee4b\\x00'\n");
    for i in 0..40 {
        dump.push_str(&format!("factory:counter_{} = {}\n", i, i * 7));
        dump.push_str(&format!("nvs.net80211:key_{} = b'value\\x00'\n", i));
    }
    dump
}

fn benchmark_partition_parse(c: &mut Criterion) {
    c.bench_function("partition_table_parse", |b| {
        b.iter(|| PartitionTable::parse(black_box(PARTITIONS_CSV)).unwrap())
    });
}

fn benchmark_dump_parse(c: &mut Criterion) {
    let dump = sample_dump();
    c.bench_function("nvs_dump_parse", |b| b.iter(|| parse_dump(black_box(&dump))));
}

fn benchmark_merge_and_render(c: &mut Criterion) {
    let current = parse_dump(&sample_dump());
    let update: NvsRecordSet = [
        ("u_camera_id", NvsValue::Integer(101)),
        ("u_unit_id", NvsValue::Integer(202)),
        ("is_model_update", NvsValue::from("1")),
    ]
    .into_iter()
    .collect();

    c.bench_function("nvs_merge_render", |b| {
        b.iter(|| {
            let mut record = DeviceProvisioningRecord::from_records(current.clone());
            record.apply(black_box(&update));
            render_csv(record.records()).unwrap()
        })
    });
}

criterion_group!(
    benches,
    benchmark_partition_parse,
    benchmark_dump_parse,
    benchmark_merge_and_render
);
criterion_main!(benches);
