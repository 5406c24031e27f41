//! Bulk insertion and record-size behavior on larger inputs.

mod common;

use common::{map_str, Mmdb};
use mmdb_writer::{DataValue, IpVersion, MmdbWriter, WriterOptions};
use rand::Rng;
use std::collections::HashMap;

fn random_record(rng: &mut impl Rng, id: u32) -> DataValue {
    let mut tags = Vec::new();
    for _ in 0..rng.random_range(1..4) {
        tags.push(DataValue::String(format!("tag-{}", rng.random::<u16>())));
    }
    let mut inner = HashMap::new();
    inner.insert("score".to_string(), DataValue::Float(rng.random::<f64>()));
    inner.insert(
        "label".to_string(),
        DataValue::String(format!("label-{}", rng.random::<u32>())),
    );

    let mut record = HashMap::new();
    record.insert("id".to_string(), DataValue::Int(id as i128));
    record.insert("name".to_string(), DataValue::String(format!("net-{}", id)));
    record.insert("tags".to_string(), DataValue::Array(tags));
    record.insert("meta".to_string(), DataValue::Map(inner));
    DataValue::Map(record)
}

#[test]
fn test_250_disjoint_slash8_networks() {
    let mut rng = rand::rng();
    let mut writer = MmdbWriter::new(WriterOptions::new(IpVersion::V4)).unwrap();
    for i in 0..250u32 {
        writer
            .insert(&format!("{}.0.0.0/8", i), random_record(&mut rng, i))
            .unwrap();
    }

    let db = Mmdb::open(writer.to_bytes().unwrap());
    for i in 0..250u32 {
        let got = db
            .get(&format!("{}.0.0.1", i))
            .unwrap_or_else(|| panic!("no record for {}.0.0.1", i));
        assert_eq!(map_str(&got, "name"), format!("net-{}", i));
        match got {
            DataValue::Map(ref m) => assert_eq!(m["id"], DataValue::Uint16(i as u16)),
            _ => unreachable!(),
        }
    }
    // Octets 250..255 were never inserted.
    assert!(db.get("250.0.0.1").is_none());
    assert!(db.get("255.255.255.255").is_none());
}

#[test]
fn test_data_section_overflow_selects_28_bit_records() {
    // Two blobs push the data section past what 24-bit records can
    // address (2^24), while staying under the per-value length limit.
    let mut writer = MmdbWriter::new(WriterOptions::new(IpVersion::V4)).unwrap();
    writer
        .insert("1.0.0.0/8", DataValue::Bytes(vec![0xAB; 8_500_000]))
        .unwrap();
    writer
        .insert("2.0.0.0/8", DataValue::Bytes(vec![0xCD; 8_500_000]))
        .unwrap();

    let db = Mmdb::open(writer.to_bytes().unwrap());
    assert_eq!(db.record_size, 28);
    match db.get("2.0.0.1").unwrap() {
        DataValue::Bytes(b) => {
            assert_eq!(b.len(), 8_500_000);
            assert_eq!(b[0], 0xCD);
        }
        other => panic!("expected bytes, got {:?}", other),
    }
    match db.get("1.255.255.255").unwrap() {
        DataValue::Bytes(b) => assert_eq!(b[0], 0xAB),
        other => panic!("expected bytes, got {:?}", other),
    }
}

#[test]
fn test_oversized_value_is_rejected() {
    let mut writer = MmdbWriter::new(WriterOptions::new(IpVersion::V4)).unwrap();
    writer
        .insert("1.0.0.0/8", DataValue::Bytes(vec![0; 16_843_036]))
        .unwrap();
    let err = writer.to_bytes().unwrap_err();
    assert!(matches!(err, mmdb_writer::WriterError::Capacity(_)));
}
