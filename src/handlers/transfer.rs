// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! High-level clients: direct sends and the queued drain path an external
//! scheduler invokes.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    cfg::config::{ClientConfig, QueuedClientConfig},
    client::connection::SiteToSiteConnector,
    handlers::sink::ResultSink,
    models::{
        error::S2sError,
        packet::DataPacket,
        transaction::TransactionResult,
    },
    queue::{DurableQueue, QueueStats},
    state_machine::{
        common::StateMachineCtx,
        drain_states::{DrainCtx, DrainReport},
        send_states::SendCtx,
    },
};

/// Client for synchronous sends: every call streams the supplied packets
/// through one transaction.
pub struct SiteToSiteClient {
    config: ClientConfig,
    connectors: Vec<Arc<SiteToSiteConnector>>,
}

impl SiteToSiteClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let connectors = config
            .remote_clusters
            .iter()
            .map(|cluster| SiteToSiteConnector::new(&config, cluster))
            .collect::<Result<Vec<_>>>()
            .context("failed to build cluster connectors")?;
        Ok(Self { config, connectors })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn connectors(&self) -> &[Arc<SiteToSiteConnector>] {
        &self.connectors
    }

    /// Streams the packets through one transaction and notifies the sink
    /// exactly once with the outcome.
    pub async fn send_packets(
        &self,
        packets: Vec<DataPacket>,
        sink: &dyn ResultSink,
    ) -> Result<TransactionResult, S2sError> {
        let mut ctx =
            SendCtx::new(self.connectors.clone(), self.config.clone(), packets);
        let outcome = ctx.execute().await;
        match &outcome {
            Ok(result) => sink.on_transaction_result(Ok(result)),
            Err(e) => sink.on_transaction_result(Err(e)),
        }
        outcome
    }
}

/// Client whose packets ride through the durable on-device queue; a
/// scheduler periodically invokes [`QueuedSiteToSiteClient::drain`].
pub struct QueuedSiteToSiteClient {
    config: QueuedClientConfig,
    inner: SiteToSiteClient,
    queue: Arc<DurableQueue>,
}

impl QueuedSiteToSiteClient {
    pub fn new<P: AsRef<Path>>(config: QueuedClientConfig, db_path: P) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(
            DurableQueue::open(db_path, &config).context("failed to open packet queue")?,
        );
        let inner = SiteToSiteClient::new(config.client.clone())?;
        Ok(Self {
            config,
            inner,
            queue,
        })
    }

    pub fn config(&self) -> &QueuedClientConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<DurableQueue> {
        &self.queue
    }

    /// Persists packets for a later drain.
    pub async fn enqueue(&self, packets: &[DataPacket]) -> Result<(), S2sError> {
        self.queue.enqueue(packets).await
    }

    /// Moves queued packets onto the wire in batched transactions until the
    /// queue is empty or the drain's time budget runs out, notifying the
    /// sink exactly once. Safe to invoke concurrently: batches are checked
    /// out atomically, so two drains never share a row.
    pub async fn drain(&self, sink: &dyn ResultSink) -> Result<DrainReport, S2sError> {
        let mut ctx = DrainCtx::new(
            self.inner.connectors().to_vec(),
            self.config.clone(),
            Arc::clone(&self.queue),
        );
        let outcome = ctx.execute().await;
        match &outcome {
            Ok(_) => sink.on_queued_result(Ok(())),
            Err(e) => sink.on_queued_result(Err(e)),
        }
        outcome
    }

    /// Applies the age, row-count and byte eviction limits.
    pub async fn cleanup(&self) -> Result<(), S2sError> {
        self.queue.cleanup().await
    }

    pub async fn stats(&self) -> Result<QueueStats, S2sError> {
        self.queue.stats().await
    }
}
