// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use tracing::{error, info};

use crate::models::{error::S2sError, transaction::TransactionResult};

/// Receives the outcome of a transfer invocation.
///
/// Each direct send or drain notifies its sink exactly once, success or
/// failure. Implementations decide how the notification crosses back to the
/// scheduling side (channel, callback, log).
pub trait ResultSink: Send + Sync {
    /// Outcome of a direct send: the committed transaction result, or the
    /// error that stopped it.
    fn on_transaction_result(&self, outcome: Result<&TransactionResult, &S2sError>);

    /// Outcome of a queued drain.
    fn on_queued_result(&self, outcome: Result<(), &S2sError>);
}

/// Sink that routes outcomes into the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ResultSink for LogSink {
    fn on_transaction_result(&self, outcome: Result<&TransactionResult, &S2sError>) {
        match outcome {
            Ok(result) => info!(
                flow_files = result.flow_files_sent,
                bytes = result.bytes_sent,
                code = %result.response_code,
                "transaction committed"
            ),
            Err(e) => error!("transaction failed: {e}"),
        }
    }

    fn on_queued_result(&self, outcome: Result<(), &S2sError>) {
        match outcome {
            Ok(()) => info!("drain finished"),
            Err(e) => error!("drain failed: {e}"),
        }
    }
}
