// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;

use crate::models::error::S2sError;

/// Bounds an I/O future with the configured request timeout; an elapsed
/// timer surfaces as a transport failure carrying the label.
pub(crate) async fn with_timeout<F, T>(
    label: &'static str,
    io_timeout: Duration,
    fut: F,
) -> Result<T, S2sError>
where
    F: Future<Output = Result<T, S2sError>>,
{
    match timeout(io_timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(S2sError::Transport(format!("{label} timed out"))),
    }
}
