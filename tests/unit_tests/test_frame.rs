// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::HashMap, io::Read};

use anyhow::Result;
use flate2::read::ZlibDecoder;
use s2s_client_rs::models::{
    error::S2sError,
    frame::{FrameEncoder, crc32_of, decode_frames},
    packet::DataPacket,
};
use tokio::io::AsyncReadExt;

/// Encodes packets through the streaming codec and collects the produced
/// body bytes together with the final CRC.
async fn encode_all(packets: &[DataPacket], compress: bool) -> Result<(Vec<u8>, u32)> {
    let (writer, mut reader) = tokio::io::duplex(4 * 1024 * 1024);
    let mut encoder = FrameEncoder::new(writer, compress);
    for packet in packets {
        encoder.write_packet(packet).await?;
    }
    let crc = encoder.finish().await?;

    let mut out = Vec::new();
    reader.read_to_end(&mut out).await?;
    Ok((out, crc))
}

fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_round_trip_preserves_attributes_and_payloads() -> Result<()> {
    let packets = vec![
        DataPacket::from_bytes(attrs(&[("id", "a"), ("kind", "report")]), "payload-a"),
        DataPacket::empty(attrs(&[("id", "b")])),
        DataPacket::from_bytes(attrs(&[]), vec![0u8, 1, 2, 255, 254]),
    ];

    let (bytes, _) = encode_all(&packets, false).await?;
    let decoded = decode_frames(&bytes)?;

    assert_eq!(decoded.len(), 3);
    assert_eq!(decoded[0].0, *packets[0].attributes());
    assert_eq!(decoded[0].1, b"payload-a");
    assert_eq!(decoded[1].0, *packets[1].attributes());
    assert!(decoded[1].1.is_empty());
    assert!(decoded[2].0.is_empty());
    assert_eq!(decoded[2].1, vec![0u8, 1, 2, 255, 254]);
    Ok(())
}

#[tokio::test]
async fn test_crc_covers_framing_bytes() -> Result<()> {
    let packets = vec![DataPacket::from_bytes(HashMap::new(), "123456789")];
    let (bytes, crc) = encode_all(&packets, false).await?;

    // attrCount=0, payloadSize=9, then the payload itself.
    let mut expected = Vec::new();
    expected.extend_from_slice(&0u32.to_be_bytes());
    expected.extend_from_slice(&9u64.to_be_bytes());
    expected.extend_from_slice(b"123456789");
    assert_eq!(bytes, expected);
    assert_eq!(crc, crc32_of(&bytes));
    Ok(())
}

#[test]
fn test_crc32_is_the_standard_algorithm() {
    // The check value of CRC-32/ISO-HDLC, the algorithm java.util.zip.CRC32
    // implements.
    assert_eq!(crc32_of(b"123456789"), 0xCBF4_3926);
}

#[tokio::test]
async fn test_compressed_body_decompresses_to_plain_framing() -> Result<()> {
    let packets = vec![
        DataPacket::from_bytes(attrs(&[("id", "z")]), "zzzzzzzzzzzzzzzzzzzzzzzz"),
        DataPacket::from_bytes(attrs(&[("id", "y")]), "yyyyyyyy"),
    ];

    let (plain, plain_crc) = encode_all(&packets, false).await?;
    let (compressed, compressed_crc) = encode_all(&packets, true).await?;

    let mut inflated = Vec::new();
    ZlibDecoder::new(&compressed[..]).read_to_end(&mut inflated)?;

    assert_eq!(inflated, plain);
    // The CRC is computed over the uncompressed stream.
    assert_eq!(compressed_crc, plain_crc);
    Ok(())
}

#[tokio::test]
async fn test_file_packet_streams_file_contents() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("payload.bin");
    tokio::fs::write(&path, b"file contents here").await?;

    let packet = DataPacket::from_file(&path);
    let (bytes, _) = encode_all(std::slice::from_ref(&packet), false).await?;
    let decoded = decode_frames(&bytes)?;

    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].1, b"file contents here");
    assert_eq!(
        decoded[0].0.get("filename").map(String::as_str),
        Some("payload.bin")
    );
    Ok(())
}

#[tokio::test]
async fn test_missing_file_leaves_stream_clean() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let missing = DataPacket::from_file(dir.path().join("gone.bin"));
    let present = DataPacket::from_bytes(attrs(&[("id", "ok")]), "still fine");

    let (writer, mut reader) = tokio::io::duplex(1024 * 1024);
    let mut encoder = FrameEncoder::new(writer, false);

    match encoder.write_packet(&missing).await {
        Err(S2sError::DataFetch { .. }) => {},
        other => panic!("expected DataFetch, got {other:?}"),
    }

    // The failed packet wrote nothing; the stream stays usable.
    encoder.write_packet(&present).await?;
    let crc = encoder.finish().await?;

    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await?;
    let decoded = decode_frames(&bytes)?;
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded[0].1, b"still fine");
    assert_eq!(crc, crc32_of(&bytes));
    Ok(())
}

#[test]
fn test_decode_rejects_truncated_stream() {
    let packets = [0u8, 0, 0, 1, 0, 0, 0, 2, b'h'];
    match decode_frames(&packets) {
        Err(S2sError::Protocol(_)) => {},
        other => panic!("expected Protocol error, got {other:?}"),
    }
}
