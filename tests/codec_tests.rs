//! Primitive codec behavior: varint widths, signed and float forms,
//! strings, and the close-time padding protocol.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snapgraph::format::padded_end;
use snapgraph::{Result, SnapError, WireRead, WireWrite};
use snapgraph::codec::{PrimitiveReader, PrimitiveWriter};

#[test]
fn varint_width_follows_the_seven_bit_rule() -> Result<()> {
    let cases: &[(u64, u64)] = &[
        (0, 1),
        (1, 1),
        (127, 1),
        (128, 2),
        (16_383, 2),
        (16_384, 3),
        (u32::MAX as u64, 5),
        (u64::MAX, 10),
    ];
    for &(value, expected_len) in cases {
        let mut writer = PrimitiveWriter::new(Vec::new());
        writer.put_varint(value)?;
        assert_eq!(writer.position(), expected_len, "width of {value}");
    }
    Ok(())
}

#[test]
fn primitive_values_roundtrip() -> Result<()> {
    let mut writer = PrimitiveWriter::new(Vec::new());
    writer.put_varint(300)?;
    writer.put_signed(-1)?;
    writer.put_signed(i64::MIN)?;
    writer.put_f64(3.5)?;
    writer.put_f32(-0.25)?;
    writer.put_str("héllo")?;
    writer.put_time(UNIX_EPOCH + Duration::from_secs(1_000))?;
    writer.put_duration(Duration::from_millis(1_500))?;
    let bytes = writer.close()?;

    let mut reader = PrimitiveReader::new(bytes.as_slice());
    assert_eq!(reader.take_varint()?, 300);
    assert_eq!(reader.take_signed()?, -1);
    assert_eq!(reader.take_signed()?, i64::MIN);
    assert_eq!(reader.take_f64()?, 3.5);
    assert_eq!(reader.take_f32()?, -0.25);
    assert_eq!(reader.take_str()?, "héllo");
    assert_eq!(
        reader.take_time()?,
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_000)
    );
    assert_eq!(reader.take_duration()?, Duration::from_millis(1_500));
    Ok(())
}

#[test]
fn float_bits_survive_exactly() -> Result<()> {
    for value in [0.0f64, -0.0, f64::MIN_POSITIVE, 1.0e308, -std::f64::consts::PI] {
        let mut writer = PrimitiveWriter::new(Vec::new());
        writer.put_f64(value)?;
        let bytes = writer.close()?;
        let mut reader = PrimitiveReader::new(bytes.as_slice());
        assert_eq!(reader.take_f64()?.to_bits(), value.to_bits());
    }
    Ok(())
}

#[test]
fn truncated_stream_reports_unexpected_end() -> Result<()> {
    let mut writer = PrimitiveWriter::new(Vec::new());
    writer.put_varint(u64::MAX)?;
    let bytes = writer.close()?;

    let mut reader = PrimitiveReader::new(&bytes[..3]);
    match reader.take_varint() {
        Err(SnapError::UnexpectedEndOfStream) => Ok(()),
        other => panic!("expected truncation error, got {other:?}"),
    }
}

#[test]
fn overlong_varint_is_rejected() {
    let bytes = [0xFFu8; 11];
    let mut reader = PrimitiveReader::new(bytes.as_slice());
    assert!(matches!(
        reader.take_varint(),
        Err(SnapError::StreamCorrupted(_))
    ));
}

#[test]
fn invalid_utf8_is_rejected() -> Result<()> {
    let mut writer = PrimitiveWriter::new(Vec::new());
    writer.put_varint(2)?;
    writer.put(&[0xC0, 0x00])?;
    let bytes = writer.close()?;

    let mut reader = PrimitiveReader::new(bytes.as_slice());
    assert!(matches!(
        reader.take_str(),
        Err(SnapError::StreamCorrupted(_))
    ));
    Ok(())
}

#[test]
fn runaway_key_nesting_is_rejected() -> Result<()> {
    let mut text = String::new();
    for _ in 0..10_000 {
        text.push_str("vec<");
    }
    text.push_str("u64");
    for _ in 0..10_000 {
        text.push('>');
    }
    assert!(matches!(
        snapgraph::TypeKey::parse(&text),
        Err(SnapError::StreamCorrupted(_))
    ));

    // Ordinary nesting stays fine.
    snapgraph::TypeKey::parse("map<str,vec<opt<ref<Node<u64>>>>>")?;
    Ok(())
}

#[test]
fn padding_boundaries() {
    assert_eq!(padded_end(0), 128);
    assert_eq!(padded_end(100), 128);
    assert_eq!(padded_end(128), 128);
    assert_eq!(padded_end(129), 1024);
    assert_eq!(padded_end(1024), 1024);
    assert_eq!(padded_end(1025), 4096);
    assert_eq!(padded_end(4096), 4096);
    assert_eq!(padded_end(4097), 8192);
    assert_eq!(padded_end(10_000), 12_288);
}

#[test]
fn closed_streams_concatenate_cleanly() -> Result<()> {
    let mut first = PrimitiveWriter::new(Vec::new());
    first.put_varint(11)?;
    let mut combined = first.close()?;
    assert_eq!(combined.len(), 128);

    let mut second = PrimitiveWriter::new(Vec::new());
    second.put_varint(22)?;
    combined.extend_from_slice(&second.close()?);

    let mut reader = PrimitiveReader::new(combined.as_slice());
    assert_eq!(reader.take_varint()?, 11);
    let rest = reader.close()?;

    let mut reader = PrimitiveReader::new(rest);
    assert_eq!(reader.take_varint()?, 22);
    Ok(())
}

#[test]
fn nonzero_padding_is_rejected() -> Result<()> {
    let mut writer = PrimitiveWriter::new(Vec::new());
    writer.put_varint(5)?;
    let mut bytes = writer.close()?;
    *bytes.last_mut().expect("padded stream is non-empty") = 0xAB;

    let mut reader = PrimitiveReader::new(bytes.as_slice());
    reader.take_varint()?;
    assert!(matches!(reader.close(), Err(SnapError::StreamCorrupted(_))));
    Ok(())
}
