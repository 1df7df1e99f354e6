// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! JSON shape of the `/site-to-site/peers` listing.

use serde::{Deserialize, Serialize};

/// One cluster node as reported by the peers endpoint.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerEntry {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    /// Queued flow-file count on that node; lower is preferred.
    #[serde(default)]
    pub flow_file_count: u64,
}

impl PeerEntry {
    /// API base for this node, `/nifi-api` included.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}/nifi-api", self.hostname, self.port)
    }
}
