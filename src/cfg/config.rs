// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Transport-side settings of the Site-to-Site client.
pub struct ClientConfig {
    #[serde(rename = "PortIdentifier")]
    /// Identifier of the remote input port transactions are opened against.
    pub port_identifier: String,

    #[serde(rename = "RemoteClusters")]
    /// Remote clusters in preference order; transaction creation rotates
    /// through them.
    pub remote_clusters: Vec<ClusterConfig>,

    #[serde(default, rename = "UseCompression")]
    /// Deflate-compress the flow-files body (and advertise it in the
    /// handshake).
    pub use_compression: bool,

    #[serde(
        default = "default_idle_expiration",
        rename = "IdleConnectionExpirationMillis",
        with = "serde_millis"
    )]
    /// Keep-alive horizon for pooled connections; also sent as the request
    /// expiration handshake header.
    pub idle_connection_expiration: Duration,

    #[serde(default = "default_batch_count", rename = "PreferredBatchCount")]
    /// Row cap per drained batch; advisory batch-count handshake header.
    /// Zero disables the cap.
    pub preferred_batch_count: u64,

    #[serde(default, rename = "PreferredBatchSizeBytes")]
    /// Cumulative payload cap per drained batch; advisory batch-size
    /// handshake header. Zero disables the cap.
    pub preferred_batch_size_bytes: u64,

    #[serde(
        default,
        rename = "PreferredBatchDurationMillis",
        with = "serde_millis"
    )]
    /// Advisory batch-duration handshake header.
    pub preferred_batch_duration: Duration,

    #[serde(
        default = "default_timeout",
        rename = "TimeoutMillis",
        with = "serde_millis"
    )]
    /// Per-request HTTP timeout (connect and total).
    pub timeout: Duration,

    #[serde(
        default = "default_peer_update_interval",
        rename = "PeerUpdateIntervalMillis",
        with = "serde_millis"
    )]
    /// How long a fetched peer list stays fresh.
    pub peer_update_interval: Duration,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// One remote cluster: seed URLs plus optional proxy and credentials.
pub struct ClusterConfig {
    #[serde(rename = "Urls")]
    /// Seed API URLs, e.g. `http://host:8080/nifi-api`.
    pub urls: Vec<String>,

    #[serde(default, rename = "Proxy")]
    pub proxy: Option<ProxyConfig>,

    #[serde(default, rename = "Credentials")]
    pub credentials: Option<Credentials>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Outbound HTTP proxy for one cluster.
pub struct ProxyConfig {
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(default, rename = "Username")]
    pub username: Option<String>,
    #[serde(default, rename = "Password")]
    pub password: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Basic-auth credentials applied to every cluster request.
pub struct Credentials {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
/// Settings of the queued client: transport plus durable-queue limits.
pub struct QueuedClientConfig {
    #[serde(flatten)]
    pub client: ClientConfig,

    #[serde(default = "default_max_rows", rename = "MaxRows")]
    /// Row-count eviction trigger. Zero disables row-count eviction.
    pub max_rows: u64,

    #[serde(default = "default_max_size_bytes", rename = "MaxSizeBytes")]
    /// Total-bytes eviction trigger. Zero disables byte eviction.
    pub max_size_bytes: u64,

    #[serde(
        default = "default_max_age",
        rename = "MaxAgeMillis",
        with = "serde_millis"
    )]
    /// Row age horizon: older rows are evicted and never drained. Zero
    /// disables age eviction.
    pub max_age: Duration,

    #[serde(
        default = "default_max_transaction_time",
        rename = "MaxTransactionTimeMillis",
        with = "serde_millis"
    )]
    /// Wall-clock budget of one drain invocation, checked between batches.
    pub max_transaction_time: Duration,
}

fn default_idle_expiration() -> Duration {
    Duration::from_secs(30)
}

fn default_batch_count() -> u64 {
    100
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_peer_update_interval() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_max_rows() -> u64 {
    10_000
}

fn default_max_size_bytes() -> u64 {
    100 * 1024 * 1024
}

fn default_max_age() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_max_transaction_time() -> Duration {
    Duration::from_secs(10 * 60)
}

impl ClientConfig {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: ClientConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates invariants shared by both client flavors.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.port_identifier.is_empty(),
            "PortIdentifier must not be empty"
        );
        ensure!(
            !self.remote_clusters.is_empty(),
            "at least one remote cluster is required"
        );
        for cluster in &self.remote_clusters {
            ensure!(
                cluster.urls.iter().any(|u| !u.is_empty()),
                "every remote cluster needs at least one URL"
            );
        }
        ensure!(!self.timeout.is_zero(), "TimeoutMillis must be > 0");
        ensure!(
            !self.peer_update_interval.is_zero(),
            "PeerUpdateIntervalMillis must be > 0"
        );
        Ok(())
    }
}

impl QueuedClientConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let cfg: QueuedClientConfig =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        ensure!(
            !self.max_transaction_time.is_zero(),
            "MaxTransactionTimeMillis must be > 0"
        );
        Ok(())
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
pub mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
