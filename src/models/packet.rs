// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The packet model: an opaque payload plus a string-to-string attribute
//! map, uniform over in-memory, file-backed and empty payloads.
//!
//! `open()` may be called any number of times; every call yields a fresh
//! reader positioned at the start of the data.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

use crate::models::error::S2sError;

/// Attribute set on file-backed packets: the file name.
pub const ATTR_FILENAME: &str = "filename";
/// Attribute set on file-backed packets: the parent directory as given.
pub const ATTR_PATH: &str = "path";
/// Attribute set on file-backed packets: the full path as given.
pub const ATTR_ABSOLUTE_PATH: &str = "absolute.path";

/// Where a packet's bytes live.
#[derive(Debug, Clone)]
pub enum PacketData {
    /// Payload held in memory.
    Bytes(Bytes),
    /// Payload produced by opening the file lazily; the length is taken at
    /// read time.
    File(PathBuf),
    /// Zero-length payload.
    Empty,
}

/// One unit of transfer: attributes plus a finite byte stream.
#[derive(Debug, Clone)]
pub struct DataPacket {
    attributes: HashMap<String, String>,
    data: PacketData,
}

impl DataPacket {
    pub fn from_bytes(
        attributes: HashMap<String, String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            attributes,
            data: PacketData::Bytes(payload.into()),
        }
    }

    pub fn empty(attributes: HashMap<String, String>) -> Self {
        Self {
            attributes,
            data: PacketData::Empty,
        }
    }

    /// File-backed packet. Seeds `filename`, `path` and `absolute.path`
    /// attributes from the path as provided; the file itself is only touched
    /// when the packet is sized or opened.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut attributes = HashMap::with_capacity(3);
        if let Some(name) = path.file_name() {
            attributes.insert(ATTR_FILENAME.to_string(), name.to_string_lossy().into_owned());
        }
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        attributes.insert(ATTR_PATH.to_string(), parent.to_string_lossy().into_owned());
        attributes.insert(
            ATTR_ABSOLUTE_PATH.to_string(),
            path.to_string_lossy().into_owned(),
        );

        Self {
            attributes,
            data: PacketData::File(path),
        }
    }

    pub fn with_attribute(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.attributes
    }

    pub fn data(&self) -> &PacketData {
        &self.data
    }

    /// Byte count of the data. For file-backed packets this is the file
    /// length at read time; a missing file surfaces as
    /// [`S2sError::DataFetch`].
    pub async fn size(&self) -> Result<u64, S2sError> {
        match &self.data {
            PacketData::Bytes(b) => Ok(b.len() as u64),
            PacketData::Empty => Ok(0),
            PacketData::File(path) => {
                let meta = tokio::fs::metadata(path)
                    .await
                    .map_err(|e| data_fetch(path, e))?;
                Ok(meta.len())
            },
        }
    }

    /// Opens a fresh reader positioned at the start of the data.
    pub async fn open(&self) -> Result<PacketReader, S2sError> {
        match &self.data {
            PacketData::Bytes(b) => Ok(PacketReader::Bytes(io::Cursor::new(b.clone()))),
            PacketData::Empty => Ok(PacketReader::Empty),
            PacketData::File(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| data_fetch(path, e))?;
                Ok(PacketReader::File(file))
            },
        }
    }

    /// Reads the full payload into memory; used when a packet is persisted
    /// into the durable queue.
    pub async fn read_to_bytes(&self) -> Result<Bytes, S2sError> {
        match &self.data {
            PacketData::Bytes(b) => Ok(b.clone()),
            PacketData::Empty => Ok(Bytes::new()),
            PacketData::File(path) => {
                let mut reader = self.open().await?;
                let mut out = Vec::new();
                reader
                    .read_to_end(&mut out)
                    .await
                    .map_err(|e| data_fetch(path, e))?;
                Ok(Bytes::from(out))
            },
        }
    }
}

fn data_fetch(path: &Path, source: std::io::Error) -> S2sError {
    S2sError::DataFetch {
        path: path.to_string_lossy().into_owned(),
        source,
    }
}

/// A single-use read handle over a packet's data.
#[derive(Debug)]
pub enum PacketReader {
    Bytes(io::Cursor<Bytes>),
    File(tokio::fs::File),
    Empty,
}

impl AsyncRead for PacketReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            PacketReader::Bytes(c) => Pin::new(c).poll_read(cx, buf),
            PacketReader::File(f) => Pin::new(f).poll_read(cx, buf),
            PacketReader::Empty => Poll::Ready(Ok(())),
        }
    }
}
