// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    pin::Pin,
    sync::Arc,
    time::Instant,
};

use tracing::{debug, warn};

use crate::{
    cfg::config::QueuedClientConfig,
    client::{
        connection::SiteToSiteConnector,
        transaction::{Transaction, begin_on_any},
    },
    models::error::S2sError,
    queue::{DurableQueue, QueueBatch},
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
};

/// Totals of one drain invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DrainReport {
    /// Transactions committed.
    pub batches: u64,
    /// Rows delivered and deleted.
    pub packets: u64,
    /// Frame bytes put on the wire (before compression).
    pub bytes: u64,
    /// Packets dropped because their data could not be opened.
    pub skipped: u64,
}

/// This structure represents the context of one drain invocation.
///
/// It walks the queue in batches, opening one transaction per batch and
/// deleting the rows only after the server has confirmed them. The deadline
/// is only consulted between batches, never mid-batch.
pub struct DrainCtx {
    connectors: Vec<Arc<SiteToSiteConnector>>,
    config: QueuedClientConfig,
    queue: Arc<DurableQueue>,
    deadline: Instant,

    batch: Option<QueueBatch>,
    txn: Option<Transaction>,
    report: DrainReport,
    state: Option<DrainStates>,
}

impl DrainCtx {
    pub fn new(
        connectors: Vec<Arc<SiteToSiteConnector>>,
        config: QueuedClientConfig,
        queue: Arc<DurableQueue>,
    ) -> Self {
        let deadline = Instant::now() + config.max_transaction_time;
        Self {
            connectors,
            config,
            queue,
            deadline,
            batch: None,
            txn: None,
            report: DrainReport::default(),
            state: Some(DrainStates::FetchBatch(FetchBatch)),
        }
    }

    /// Checks out the next batch; false means the queue is drained.
    async fn fetch_batch(&mut self) -> Result<bool, S2sError> {
        let batch = self
            .queue
            .next_batch(
                self.config.client.preferred_batch_count,
                self.config.client.preferred_batch_size_bytes,
                self.config.max_age,
            )
            .await?;
        if batch.is_empty() {
            return Ok(false);
        }
        debug!(count = batch.len(), bytes = batch.total_bytes(), "batch fetched");
        self.batch = Some(batch);
        Ok(true)
    }

    /// Opens a transaction for the checked-out batch and streams its rows,
    /// newest first. A packet whose data cannot be opened is skipped with a
    /// warning; everything else aborts the drain.
    async fn stream_batch(&mut self) -> Result<(), S2sError> {
        let txn = begin_on_any(&self.connectors, &self.config.client).await?;
        self.txn = Some(txn);

        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| S2sError::Protocol("no open transaction".to_string()))?;
        let batch = self
            .batch
            .as_ref()
            .ok_or_else(|| S2sError::Protocol("no batch checked out".to_string()))?;
        for row in batch.rows() {
            let packet = row.to_packet();
            match txn.send(&packet).await {
                Ok(()) => {},
                Err(e @ S2sError::DataFetch { .. }) => {
                    warn!(row = row.id, "skipping packet: {e}");
                    self.report.skipped += 1;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Confirms and commits the transaction, then deletes the rows.
    async fn finish_batch(&mut self) -> Result<(), S2sError> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| S2sError::Protocol("no open transaction".to_string()))?;
        txn.confirm().await?;
        let result = txn.complete().await?;
        self.txn = None;

        // Keep the batch on the ctx until the delete lands, so a queue
        // failure here still reaches the rollback path.
        {
            let batch = self
                .batch
                .as_ref()
                .ok_or_else(|| S2sError::Protocol("no batch checked out".to_string()))?;
            self.queue.commit(batch).await?;
        }
        let batch = self
            .batch
            .take()
            .ok_or_else(|| S2sError::Protocol("no batch checked out".to_string()))?;

        self.report.batches += 1;
        self.report.packets += batch.len() as u64;
        self.report.bytes += result.bytes_sent;
        Ok(())
    }

    /// Best-effort recovery: cancel the open transaction and make the
    /// batch's rows visible again.
    async fn abort(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            txn.cancel()
                .await
                .unwrap_or_else(|e| warn!("cancel after drain failure failed: {e}"));
        }
        if let Some(batch) = self.batch.take() {
            self.queue
                .rollback(&batch)
                .await
                .unwrap_or_else(|e| warn!("rollback after drain failure failed: {e}"));
        }
    }
}

/// Deadline check plus batch checkout.
#[derive(Debug)]
pub struct FetchBatch;

/// Streams the checked-out batch into a fresh transaction.
#[derive(Debug)]
pub struct Stream;

/// Confirms, commits and deletes the batch.
#[derive(Debug)]
pub struct Finish;

/// Defines the possible states of the drain loop.
#[derive(Debug)]
pub enum DrainStates {
    FetchBatch(FetchBatch),
    Stream(Stream),
    Finish(Finish),
}

type DrainStep = Transition<DrainStates, Result<(), S2sError>>;

impl StateMachine<DrainCtx, DrainStep> for FetchBatch {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DrainStep> + Send + 'a>>
    where
        Self: 'a,
        DrainCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DrainCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            if Instant::now() >= ctx.deadline {
                debug!("drain deadline reached between batches");
                return Transition::Done(Ok(()));
            }
            match ctx.fetch_batch().await {
                Ok(true) => Transition::Next(DrainStates::Stream(Stream), Ok(())),
                Ok(false) => Transition::Done(Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachine<DrainCtx, DrainStep> for Stream {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DrainStep> + Send + 'a>>
    where
        Self: 'a,
        DrainCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DrainCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.stream_batch().await {
                Ok(()) => Transition::Next(DrainStates::Finish(Finish), Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachine<DrainCtx, DrainStep> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = DrainStep> + Send + 'a>>
    where
        Self: 'a,
        DrainCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut DrainCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.finish_batch().await {
                Ok(()) => Transition::Next(DrainStates::FetchBatch(FetchBatch), Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachineCtx<DrainReport> for DrainCtx {
    async fn execute(&mut self) -> Result<DrainReport, S2sError> {
        debug!("Loop Drain");
        loop {
            let state = self
                .state
                .take()
                .ok_or_else(|| S2sError::Protocol("state must be set DrainCtx".to_string()))?;
            let trans = match state {
                DrainStates::FetchBatch(s) => s.step(self).await,
                DrainStates::Stream(s) => s.step(self).await,
                DrainStates::Finish(s) => s.step(self).await,
            };

            match trans {
                Transition::Next(next, r) => {
                    if let Err(e) = r {
                        self.abort().await;
                        return Err(e);
                    }
                    self.state = Some(next);
                },
                Transition::Stay(Ok(())) => {},
                Transition::Stay(Err(e)) => {
                    self.abort().await;
                    return Err(e);
                },
                Transition::Done(Ok(())) => return Ok(self.report),
                Transition::Done(Err(e)) => {
                    self.abort().await;
                    return Err(e);
                },
            }
        }
    }
}
