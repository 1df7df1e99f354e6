// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{pin::Pin, sync::Arc};

use tracing::{debug, warn};

use crate::{
    cfg::config::ClientConfig,
    client::{
        connection::SiteToSiteConnector,
        transaction::{Transaction, begin_on_any},
    },
    models::{error::S2sError, packet::DataPacket, transaction::TransactionResult},
    state_machine::common::{StateMachine, StateMachineCtx, Transition},
};

/// This structure represents the context of one direct (non-queued) send:
/// a single transaction over a caller-supplied packet list.
pub struct SendCtx {
    connectors: Vec<Arc<SiteToSiteConnector>>,
    config: ClientConfig,
    packets: Vec<DataPacket>,

    txn: Option<Transaction>,
    result: Option<TransactionResult>,
    state: Option<SendStates>,
}

impl SendCtx {
    pub fn new(
        connectors: Vec<Arc<SiteToSiteConnector>>,
        config: ClientConfig,
        packets: Vec<DataPacket>,
    ) -> Self {
        Self {
            connectors,
            config,
            packets,
            txn: None,
            result: None,
            state: Some(SendStates::Start(Start)),
        }
    }

    async fn open_transaction(&mut self) -> Result<(), S2sError> {
        let txn = begin_on_any(&self.connectors, &self.config).await?;
        self.txn = Some(txn);
        Ok(())
    }

    /// Streams every packet; packets whose data cannot be opened are
    /// skipped with a warning.
    async fn stream_packets(&mut self) -> Result<(), S2sError> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| S2sError::Protocol("no open transaction".to_string()))?;
        for packet in &self.packets {
            match txn.send(packet).await {
                Ok(()) => {},
                Err(e @ S2sError::DataFetch { .. }) => {
                    warn!("skipping packet: {e}");
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), S2sError> {
        let txn = self
            .txn
            .as_mut()
            .ok_or_else(|| S2sError::Protocol("no open transaction".to_string()))?;
        txn.confirm().await?;
        self.result = Some(txn.complete().await?);
        self.txn = None;
        Ok(())
    }

    async fn abort(&mut self) {
        if let Some(mut txn) = self.txn.take() {
            txn.cancel()
                .await
                .unwrap_or_else(|e| warn!("cancel after send failure failed: {e}"));
        }
    }
}

/// Opens the transaction.
#[derive(Debug)]
pub struct Start;

/// Streams the caller's packets.
#[derive(Debug)]
pub struct Streaming;

/// Confirms the checksum and commits.
#[derive(Debug)]
pub struct Finish;

/// Defines the possible states of a direct send.
#[derive(Debug)]
pub enum SendStates {
    Start(Start),
    Streaming(Streaming),
    Finish(Finish),
}

type SendStep = Transition<SendStates, Result<(), S2sError>>;

impl StateMachine<SendCtx, SendStep> for Start {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SendStep> + Send + 'a>>
    where
        Self: 'a,
        SendCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut SendCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.open_transaction().await {
                Ok(()) => Transition::Next(SendStates::Streaming(Streaming), Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachine<SendCtx, SendStep> for Streaming {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SendStep> + Send + 'a>>
    where
        Self: 'a,
        SendCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut SendCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.stream_packets().await {
                Ok(()) => Transition::Next(SendStates::Finish(Finish), Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachine<SendCtx, SendStep> for Finish {
    type StepResult<'a>
        = Pin<Box<dyn Future<Output = SendStep> + Send + 'a>>
    where
        Self: 'a,
        SendCtx: 'a;

    fn step<'a>(&'a self, ctx: &'a mut SendCtx) -> Self::StepResult<'a> {
        Box::pin(async move {
            match ctx.finish().await {
                Ok(()) => Transition::Done(Ok(())),
                Err(e) => Transition::Done(Err(e)),
            }
        })
    }
}

impl StateMachineCtx<TransactionResult> for SendCtx {
    async fn execute(&mut self) -> Result<TransactionResult, S2sError> {
        debug!("Loop Send");
        loop {
            let state = self
                .state
                .take()
                .ok_or_else(|| S2sError::Protocol("state must be set SendCtx".to_string()))?;
            let trans = match state {
                SendStates::Start(s) => s.step(self).await,
                SendStates::Streaming(s) => s.step(self).await,
                SendStates::Finish(s) => s.step(self).await,
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
                Transition::Done(Ok(())) => {
                    return self.result.take().ok_or_else(|| {
                        S2sError::Protocol("no transaction result in ctx".to_string())
                    });
                },
                Transition::Done(Err(e)) => {
                    self.abort().await;
                    return Err(e);
                },
            }
        }
    }
}
