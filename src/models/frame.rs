// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Wire framing for the flow-files channel.
//!
//! Each packet is serialized as
//!
//! ```text
//! u32  attribute count          (big-endian)
//! per attribute:
//!   u32 key length, key utf8
//!   u32 value length, value utf8
//! u64  payload length           (big-endian)
//! payload bytes
//! ```
//!
//! A running CRC32 covers every byte written since the encoder was created,
//! framing included, and is always computed over the UNCOMPRESSED stream;
//! the optional deflate stage sits between the encoder and the HTTP body.

use std::collections::HashMap;

use crc::{CRC_32_ISO_HDLC, Crc, Digest};
use flate2::{Compression, write::ZlibEncoder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::models::{error::S2sError, packet::DataPacket};

/// CRC-32 as produced by `java.util.zip.CRC32` on the server side.
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

const COPY_BUF_LEN: usize = 8 * 1024;

/// Output stage of the encoder: either the HTTP body writer directly, or a
/// deflate stream drained into it.
pub enum BodySink<W> {
    Plain(W),
    Deflate {
        encoder: ZlibEncoder<Vec<u8>>,
        writer: W,
    },
}

impl<W: AsyncWrite + Unpin + Send> BodySink<W> {
    fn new(writer: W, compress: bool) -> Self {
        if compress {
            BodySink::Deflate {
                encoder: ZlibEncoder::new(Vec::new(), Compression::default()),
                writer,
            }
        } else {
            BodySink::Plain(writer)
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            BodySink::Plain(w) => w.write_all(buf).await,
            BodySink::Deflate { encoder, writer } => {
                use std::io::Write as _;
                encoder.write_all(buf)?;
                let pending = std::mem::take(encoder.get_mut());
                if !pending.is_empty() {
                    writer.write_all(&pending).await?;
                }
                Ok(())
            },
        }
    }

    async fn shutdown(self) -> std::io::Result<()> {
        match self {
            BodySink::Plain(mut w) => w.shutdown().await,
            BodySink::Deflate {
                encoder,
                mut writer,
            } => {
                let rest = encoder.finish()?;
                if !rest.is_empty() {
                    writer.write_all(&rest).await?;
                }
                writer.shutdown().await
            },
        }
    }
}

/// Streaming serializer for a sequence of packets.
///
/// An I/O failure mid-write poisons the encoder; every later call fails with
/// [`S2sError::Transport`].
pub struct FrameEncoder<W> {
    sink: Option<BodySink<W>>,
    digest: Digest<'static, u32>,
}

impl<W: AsyncWrite + Unpin + Send> FrameEncoder<W> {
    pub fn new(writer: W, compress: bool) -> Self {
        Self {
            sink: Some(BodySink::new(writer, compress)),
            digest: CRC32.digest(),
        }
    }

    /// Serializes one packet. The packet's size and reader are resolved
    /// before any framing byte goes out, so a [`S2sError::DataFetch`]
    /// failure leaves the stream clean and the packet can be skipped.
    ///
    /// Returns the number of frame bytes written.
    pub async fn write_packet(&mut self, packet: &DataPacket) -> Result<u64, S2sError> {
        if self.sink.is_none() {
            return Err(S2sError::Transport("frame writer is closed".to_string()));
        }

        let payload_len = packet.size().await?;
        let reader = packet.open().await?;

        let mut head = Vec::with_capacity(64);
        let attrs = packet.attributes();
        head.extend_from_slice(&(attrs.len() as u32).to_be_bytes());
        for (key, value) in attrs {
            head.extend_from_slice(&(key.len() as u32).to_be_bytes());
            head.extend_from_slice(key.as_bytes());
            head.extend_from_slice(&(value.len() as u32).to_be_bytes());
            head.extend_from_slice(value.as_bytes());
        }
        head.extend_from_slice(&payload_len.to_be_bytes());

        self.write_raw(&head).await?;
        let copied = self.copy_payload(reader, payload_len).await?;
        if copied != payload_len {
            self.poison();
            return Err(S2sError::Transport(format!(
                "packet payload truncated: expected {payload_len} bytes, read {copied}"
            )));
        }

        Ok(head.len() as u64 + copied)
    }

    /// Terminates the sink (flushing any buffered deflate output) and
    /// returns the final CRC32.
    pub async fn finish(mut self) -> Result<u32, S2sError> {
        let sink = self
            .sink
            .take()
            .ok_or_else(|| S2sError::Transport("frame writer is closed".to_string()))?;
        sink.shutdown().await?;
        Ok(self.digest.finalize())
    }

    async fn copy_payload(
        &mut self,
        reader: impl AsyncRead + Unpin,
        payload_len: u64,
    ) -> Result<u64, S2sError> {
        let mut limited = reader.take(payload_len);
        let mut buf = [0u8; COPY_BUF_LEN];
        let mut copied = 0u64;
        loop {
            let n = match limited.read(&mut buf).await {
                Ok(0) => return Ok(copied),
                Ok(n) => n,
                Err(e) => {
                    self.poison();
                    return Err(e.into());
                },
            };
            self.write_raw(&buf[..n]).await?;
            copied += n as u64;
        }
    }

    async fn write_raw(&mut self, buf: &[u8]) -> Result<(), S2sError> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| S2sError::Transport("frame writer is closed".to_string()))?;
        self.digest.update(buf);
        if let Err(e) = sink.write_all(buf).await {
            self.poison();
            return Err(e.into());
        }
        Ok(())
    }

    fn poison(&mut self) {
        self.sink = None;
    }
}

/// CRC32 of a fully assembled byte run; used by tests and by servers
/// confirming a received stream.
pub fn crc32_of(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}

/// One decoded frame: the attribute map and the payload bytes.
pub type DecodedFrame = (HashMap<String, String>, Vec<u8>);

/// Reference decoder for the frame format. Consumes the whole buffer and
/// returns `(attributes, payload)` pairs in stream order.
pub fn decode_frames(buf: &[u8]) -> Result<Vec<DecodedFrame>, S2sError> {
    let mut rd = SliceReader { buf, pos: 0 };
    let mut out = Vec::new();
    while !rd.is_empty() {
        let attr_count = rd.read_u32()?;
        let mut attrs = HashMap::with_capacity(attr_count as usize);
        for _ in 0..attr_count {
            let key = rd.read_string()?;
            let value = rd.read_string()?;
            attrs.insert(key, value);
        }
        let payload_len = rd.read_u64()?;
        let payload = rd.read_exact(payload_len as usize)?.to_vec();
        out.push((attrs, payload));
    }
    Ok(out)
}

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_exact(&mut self, n: usize) -> Result<&'a [u8], S2sError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                S2sError::Protocol("unexpected end of frame stream".to_string())
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_u32(&mut self) -> Result<u32, S2sError> {
        let raw = self.read_exact(4)?;
        Ok(u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    fn read_u64(&mut self) -> Result<u64, S2sError> {
        let raw = self.read_exact(8)?;
        Ok(u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
    }

    fn read_string(&mut self) -> Result<String, S2sError> {
        let len = self.read_u32()? as usize;
        let raw = self.read_exact(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| S2sError::Protocol("non-utf8 attribute in frame".to_string()))
    }
}
