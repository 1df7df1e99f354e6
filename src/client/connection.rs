// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! HTTP side of the peer connection manager: one shared `reqwest` client
//! per cluster, handshake headers injected on every request, and the peer
//! listing renewal.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::{
    Client, Method, RequestBuilder,
    header::{ACCEPT, HeaderMap, HeaderValue},
};
use tracing::{debug, warn};

use crate::{
    cfg::config::{ClientConfig, ClusterConfig, Credentials},
    client::peers::PeerCluster,
    models::{error::S2sError, peers::PeerEntry},
};

/// Handshake header: client streams a deflate-compressed body.
pub const HEADER_USE_COMPRESSION: &str = "x-nifi-site-to-site-use-compression";
/// Handshake header: how long the server may hold an idle request open.
pub const HEADER_REQUEST_EXPIRATION: &str = "x-nifi-site-to-site-request-expiration";
/// Handshake header: advisory flow-file count per server-side batch.
pub const HEADER_BATCH_COUNT: &str = "x-nifi-site-to-site-batch-count";
/// Handshake header: advisory byte size per server-side batch.
pub const HEADER_BATCH_SIZE: &str = "x-nifi-site-to-site-batch-size";
/// Handshake header: advisory duration per server-side batch.
pub const HEADER_BATCH_DURATION: &str = "x-nifi-site-to-site-batch-duration";

/// Transaction-creation response: declares what the `Location` header is.
pub const HEADER_LOCATION_URI_INTENT: &str = "x-location-uri-intent";
/// The only intent this client accepts.
pub const LOCATION_URI_INTENT_TRANSACTION: &str = "transaction-url";
/// Transaction-creation response: server-side transaction TTL in seconds.
pub const HEADER_SERVER_TRANSACTION_TTL: &str =
    "x-nifi-site-to-site-server-transaction-ttl";

/// Authenticated HTTP access to one remote cluster.
///
/// Owns the pooled `reqwest` client, the immutable handshake header set
/// derived from config, and the ranked peer list.
#[derive(Debug)]
pub struct SiteToSiteConnector {
    client: Client,
    cluster: PeerCluster,
    handshake: HeaderMap,
    credentials: Option<Credentials>,
    timeout: Duration,
}

impl SiteToSiteConnector {
    pub fn new(config: &ClientConfig, cluster_cfg: &ClusterConfig) -> Result<Arc<Self>> {
        let mut builder = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .pool_idle_timeout(config.idle_connection_expiration);

        if let Some(proxy_cfg) = &cluster_cfg.proxy {
            let mut proxy = reqwest::Proxy::all(&proxy_cfg.url)
                .with_context(|| format!("invalid proxy URL {}", proxy_cfg.url))?;
            if let (Some(user), Some(pass)) = (&proxy_cfg.username, &proxy_cfg.password)
            {
                proxy = proxy.basic_auth(user, pass);
            }
            builder = builder.proxy(proxy);
        }

        let client = builder.build().context("failed to build HTTP client")?;

        Ok(Arc::new(Self {
            client,
            cluster: PeerCluster::new(&cluster_cfg.urls, config.peer_update_interval),
            handshake: handshake_headers(config)?,
            credentials: cluster_cfg.credentials.clone(),
            timeout: config.timeout,
        }))
    }

    /// Per-request HTTP timeout from config.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Prepares a request against `base + path` with handshake headers and
    /// credentials applied.
    pub fn request(&self, method: Method, base: &str, path: &str) -> RequestBuilder {
        let url = format!("{base}{path}");
        let mut rb = self
            .client
            .request(method, url)
            .headers(self.handshake.clone());
        if let Some(c) = &self.credentials {
            rb = rb.basic_auth(&c.username, Some(&c.password));
        }
        rb
    }

    /// API bases in drain-preference order, renewing the peer list first
    /// when it has gone stale. Refresh failures are logged; a stale list is
    /// still usable.
    pub async fn ranked_bases(&self) -> Vec<String> {
        if self.cluster.is_stale().await {
            self.refresh_peers()
                .await
                .unwrap_or_else(|e| warn!("peer refresh failed: {e}"));
        }
        self.cluster.ranked_bases().await
    }

    /// Marks the peer list stale; the next `ranked_bases` re-fetches it.
    pub async fn invalidate_peers(&self) {
        self.cluster.invalidate().await;
    }

    /// Fetches `/site-to-site/peers` from the first answering base and
    /// replaces the ranked list.
    pub async fn refresh_peers(&self) -> Result<(), S2sError> {
        let mut last_err = S2sError::Transport("no peer candidates".to_string());
        for base in self.cluster.refresh_candidates().await {
            let result = self
                .request(Method::GET, &base, "/site-to-site/peers")
                .header(ACCEPT, "application/json")
                .send()
                .await;
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    debug!(%base, "peer listing request failed: {e}");
                    last_err = e.into();
                    continue;
                },
            };
            if !resp.status().is_success() {
                last_err = S2sError::Protocol(format!(
                    "peer listing responseCode={}",
                    resp.status().as_u16()
                ));
                continue;
            }
            let entries: Vec<PeerEntry> = resp.json().await.map_err(|e| {
                S2sError::Protocol(format!("malformed peer listing: {e}"))
            })?;
            self.cluster.replace(entries).await;
            return Ok(());
        }
        Err(last_err)
    }
}

/// Builds the handshake header set; a header is present only when its
/// source config value is set/positive.
fn handshake_headers(config: &ClientConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    if config.use_compression {
        headers.insert(HEADER_USE_COMPRESSION, HeaderValue::from_static("true"));
    }
    let numeric = [
        (
            HEADER_REQUEST_EXPIRATION,
            config.idle_connection_expiration.as_millis() as u64,
        ),
        (HEADER_BATCH_COUNT, config.preferred_batch_count),
        (HEADER_BATCH_SIZE, config.preferred_batch_size_bytes),
        (
            HEADER_BATCH_DURATION,
            config.preferred_batch_duration.as_millis() as u64,
        ),
    ];
    for (name, value) in numeric {
        if value > 0 {
            headers.insert(
                name,
                HeaderValue::from_str(&value.to_string())
                    .with_context(|| format!("invalid value for {name}"))?,
            );
        }
    }
    Ok(headers)
}
