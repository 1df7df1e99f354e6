// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Error taxonomy of the transport and queue subsystem.
//!
//! The split matters to callers: the drain worker skips a packet on
//! [`S2sError::DataFetch`], rolls the batch back and stops on everything
//! else. Heartbeat failures are logged at the source and never reach this
//! type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum S2sError {
    /// Network or HTTP-level failure: connect/read timeout, broken stream,
    /// request-body write failure.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The server response violates the Site-to-Site contract (missing
    /// headers, unparseable TTL, unexpected status or body).
    #[error("site-to-site protocol violation: {0}")]
    Protocol(String),

    /// The server read a different CRC32 than the one computed locally over
    /// the frame stream.
    #[error("checksum mismatch: local={local} remote={remote}")]
    ChecksumMismatch { local: u32, remote: u32 },

    /// A single packet's data could not be opened (e.g. backing file
    /// vanished). Non-fatal: the packet is skipped within its batch.
    #[error("packet data unavailable at {path}: {source}")]
    DataFetch {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Persistence failure in the durable queue.
    #[error("queue failure: {0}")]
    Queue(String),
}

impl From<reqwest::Error> for S2sError {
    fn from(e: reqwest::Error) -> Self {
        S2sError::Transport(e.to_string())
    }
}

impl From<std::io::Error> for S2sError {
    fn from(e: std::io::Error) -> Self {
        S2sError::Transport(e.to_string())
    }
}

impl From<rusqlite::Error> for S2sError {
    fn from(e: rusqlite::Error) -> Self {
        S2sError::Queue(e.to_string())
    }
}

impl From<serde_json::Error> for S2sError {
    fn from(e: serde_json::Error) -> Self {
        S2sError::Queue(format!("attribute blob: {e}"))
    }
}
