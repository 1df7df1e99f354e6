// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! One in-flight Site-to-Site transaction over HTTP.
//!
//! Lifecycle: `POST .../transactions` creates it, packets stream through a
//! chunked `POST {url}/flow-files` body, the server's CRC is confirmed, and
//! a `DELETE {url}?responseCode=N` ends it. A background task extends the
//! server-side TTL every `ttl/2` seconds for as long as the transaction is
//! open; both HTTP channels and that task are released on every exit path.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reqwest::{
    Body, Method, Response,
    header::{ACCEPT, CONTENT_TYPE, LOCATION},
};
use tokio::{
    io::DuplexStream,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::{io::ReaderStream, sync::CancellationToken};
use tracing::{debug, warn};

use crate::{
    cfg::config::ClientConfig,
    client::{
        common::with_timeout,
        connection::{
            HEADER_LOCATION_URI_INTENT, HEADER_SERVER_TRANSACTION_TTL,
            LOCATION_URI_INTENT_TRANSACTION, SiteToSiteConnector,
        },
    },
    models::{
        error::S2sError,
        frame::FrameEncoder,
        packet::DataPacket,
        transaction::{ResponseCode, TransactionResult, TransactionResultEntity},
    },
};

const OCTET_STREAM: &str = "application/octet-stream";
const DUPLEX_CAPACITY: usize = 64 * 1024;

/// Where a transaction is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Sending,
    Confirmed,
    Committed,
    Canceled,
    Failed,
}

struct Heartbeat {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// The task is a closure over (connector, base, path) only; it cannot
    /// prolong the transaction's lifetime.
    fn spawn(
        connector: Arc<SiteToSiteConnector>,
        base: String,
        path: String,
        ttl_seconds: u64,
    ) -> Self {
        let cancel = CancellationToken::new();
        let child = cancel.clone();
        let period = Duration::from_millis(ttl_seconds.saturating_mul(500).max(500));
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let result = connector
                            .request(Method::PUT, &base, &path)
                            .send()
                            .await;
                        match result {
                            Ok(resp) if resp.status().is_success() => {
                                debug!(%path, "transaction ttl extended");
                            },
                            Ok(resp) => warn!(
                                %path,
                                code = resp.status().as_u16(),
                                "ttl extension rejected"
                            ),
                            Err(e) => warn!(%path, "ttl extension failed: {e}"),
                        }
                    }
                }
            }
        });
        Self { cancel, handle }
    }
}

/// Handle to one open transaction.
pub struct Transaction {
    connector: Arc<SiteToSiteConnector>,
    base: String,
    path: String,
    ttl_seconds: u64,
    state: TransactionState,
    encoder: Option<FrameEncoder<DuplexStream>>,
    response: Option<JoinHandle<Result<Response, reqwest::Error>>>,
    heartbeat: Option<Heartbeat>,
    io_timeout: Duration,
    packets_sent: u64,
    bytes_sent: u64,
    started: Instant,
}

impl Transaction {
    /// Creates a transaction against the best-ranked peer, retrying once on
    /// the next peer after a connect-level failure (which also marks the
    /// peer list stale).
    pub async fn begin(
        connector: &Arc<SiteToSiteConnector>,
        config: &ClientConfig,
    ) -> Result<Self, S2sError> {
        let bases = connector.ranked_bases().await;
        if bases.is_empty() {
            return Err(S2sError::Transport(
                "no peers available for transaction".to_string(),
            ));
        }

        let mut last_err = None;
        for base in bases.iter().take(2) {
            match Self::create_on(connector, config, base).await {
                Ok(txn) => return Ok(txn),
                Err(e @ S2sError::Transport(_)) => {
                    warn!(%base, "transaction creation failed: {e}");
                    connector.invalidate_peers().await;
                    last_err = Some(e);
                },
                Err(e) => return Err(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| S2sError::Transport("transaction creation failed".to_string())))
    }

    async fn create_on(
        connector: &Arc<SiteToSiteConnector>,
        config: &ClientConfig,
        base: &str,
    ) -> Result<Self, S2sError> {
        let create_path = format!(
            "/data-transfer/input-ports/{}/transactions",
            config.port_identifier
        );
        let resp = connector
            .request(Method::POST, base, &create_path)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(S2sError::Protocol(format!(
                "responseCode={}",
                status.as_u16()
            )));
        }

        let intent = resp
            .headers()
            .get(HEADER_LOCATION_URI_INTENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if intent.as_deref() != Some(LOCATION_URI_INTENT_TRANSACTION) {
            return Err(S2sError::Protocol(format!(
                "{HEADER_LOCATION_URI_INTENT} missing or not \
                 {LOCATION_URI_INTENT_TRANSACTION:?}"
            )));
        }

        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                S2sError::Protocol("Location header missing on created transaction".to_string())
            })?;

        let ttl_seconds = resp
            .headers()
            .get(HEADER_SERVER_TRANSACTION_TTL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| {
                S2sError::Protocol(format!(
                    "{HEADER_SERVER_TRANSACTION_TTL} missing or not a positive integer"
                ))
            })?;

        let path = transaction_path(&location)?;
        debug!(%path, ttl_seconds, "transaction created");

        let heartbeat = Heartbeat::spawn(
            Arc::clone(connector),
            base.to_string(),
            path.clone(),
            ttl_seconds,
        );

        let (writer, reader) = tokio::io::duplex(DUPLEX_CAPACITY);
        let body = Body::wrap_stream(ReaderStream::new(reader));
        let request = connector
            .request(Method::POST, base, &format!("{path}/flow-files"))
            .header(CONTENT_TYPE, OCTET_STREAM)
            .header(ACCEPT, "text/plain")
            .body(body);
        let response = tokio::spawn(request.send());

        Ok(Self {
            connector: Arc::clone(connector),
            base: base.to_string(),
            path,
            ttl_seconds,
            state: TransactionState::Open,
            encoder: Some(FrameEncoder::new(writer, config.use_compression)),
            response: Some(response),
            heartbeat: Some(heartbeat),
            io_timeout: connector.timeout(),
            packets_sent: 0,
            bytes_sent: 0,
            started: Instant::now(),
        })
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Transaction path on the peer, `/nifi-api` prefix already stripped.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Streams one packet into the flow-files body.
    ///
    /// A [`S2sError::DataFetch`] failure leaves the stream clean and the
    /// transaction usable; the caller may skip the packet and continue. Any
    /// other failure poisons the transaction.
    pub async fn send(&mut self, packet: &DataPacket) -> Result<(), S2sError> {
        match self.state {
            TransactionState::Open | TransactionState::Sending => {},
            state => {
                return Err(S2sError::Protocol(format!(
                    "send on transaction in state {state:?}"
                )));
            },
        }
        let io_timeout = self.io_timeout;
        let encoder = self
            .encoder
            .as_mut()
            .ok_or_else(|| S2sError::Transport("flow-files channel closed".to_string()))?;

        match with_timeout("flow-files write", io_timeout, encoder.write_packet(packet))
            .await
        {
            Ok(written) => {
                self.state = TransactionState::Sending;
                self.packets_sent += 1;
                self.bytes_sent += written;
                Ok(())
            },
            Err(e @ S2sError::DataFetch { .. }) => Err(e),
            Err(e) => {
                self.fail();
                Err(e)
            },
        }
    }

    /// Closes the frame stream and checks the server's CRC against the
    /// local one. On mismatch the transaction is ended with `BadChecksum`
    /// and the call fails with [`S2sError::ChecksumMismatch`].
    pub async fn confirm(&mut self) -> Result<(), S2sError> {
        match self.state {
            TransactionState::Open | TransactionState::Sending => {},
            state => {
                return Err(S2sError::Protocol(format!(
                    "confirm on transaction in state {state:?}"
                )));
            },
        }

        let encoder = self
            .encoder
            .take()
            .ok_or_else(|| S2sError::Transport("flow-files channel closed".to_string()))?;
        let local = match with_timeout("flow-files finish", self.io_timeout, encoder.finish())
            .await
        {
            Ok(crc) => crc,
            Err(e) => {
                self.fail();
                return Err(e);
            },
        };

        let response = match self.response.take() {
            Some(r) => r,
            None => {
                self.fail();
                return Err(S2sError::Transport(
                    "flow-files response already consumed".to_string(),
                ));
            },
        };
        let resp = match response.await {
            Ok(Ok(resp)) => resp,
            Ok(Err(e)) => {
                self.fail();
                return Err(e.into());
            },
            Err(e) => {
                self.fail();
                return Err(S2sError::Transport(format!("flow-files task failed: {e}")));
            },
        };

        let status = resp.status().as_u16();
        if status != 200 && status != 202 {
            self.fail();
            return Err(S2sError::Protocol(format!(
                "flow-files responseCode={status}"
            )));
        }
        let body = match resp.text().await {
            Ok(body) => body,
            Err(e) => {
                self.fail();
                return Err(e.into());
            },
        };
        let remote: u32 = match body.trim().parse() {
            Ok(crc) => crc,
            Err(_) => {
                self.fail();
                return Err(S2sError::Protocol(format!(
                    "flow-files body is not a checksum: {body:?}"
                )));
            },
        };

        if remote != local {
            warn!(local, remote, "server checksum disagrees; discarding transaction");
            if let Err(e) = self.end(ResponseCode::BadChecksum).await {
                warn!("failed to report bad checksum: {e}");
            }
            self.state = TransactionState::Failed;
            return Err(S2sError::ChecksumMismatch { local, remote });
        }

        self.state = TransactionState::Confirmed;
        Ok(())
    }

    /// Commits a confirmed transaction and returns the server-acknowledged
    /// result.
    pub async fn complete(&mut self) -> Result<TransactionResult, S2sError> {
        if self.state != TransactionState::Confirmed {
            return Err(S2sError::Protocol(format!(
                "complete on transaction in state {:?}",
                self.state
            )));
        }

        let entity = match self.end(ResponseCode::ConfirmTransaction).await {
            Ok(entity) => entity,
            Err(e) => {
                self.fail();
                return Err(e);
            },
        };
        self.state = TransactionState::Committed;

        Ok(TransactionResult {
            response_code: ResponseCode::try_from(entity.response_code)
                .unwrap_or(ResponseCode::UnrecognizedResponseCode),
            message: entity.message,
            flow_files_sent: entity.flow_file_sent,
            bytes_sent: self.bytes_sent,
            duration: self.started.elapsed(),
        })
    }

    /// Ends the transaction with `CancelTransaction`. A no-op on already
    /// finished transactions, so it is safe as a best-effort cleanup path.
    pub async fn cancel(&mut self) -> Result<(), S2sError> {
        match self.state {
            TransactionState::Committed
            | TransactionState::Canceled
            | TransactionState::Failed => return Ok(()),
            _ => {},
        }
        let result = self.end(ResponseCode::CancelTransaction).await;
        self.state = TransactionState::Canceled;
        result.map(|_| ())
    }

    /// Stops the heartbeat, disconnects the flow-files channel and issues
    /// the end-transaction `DELETE`.
    async fn end(
        &mut self,
        code: ResponseCode,
    ) -> Result<TransactionResultEntity, S2sError> {
        self.stop_heartbeat().await?;
        self.encoder = None;
        if let Some(response) = self.response.take() {
            response.abort();
        }

        let end_path = format!("{}?responseCode={}", self.path, u8::from(code));
        let resp = self
            .connector
            .request(Method::DELETE, &self.base, &end_path)
            .header(CONTENT_TYPE, OCTET_STREAM)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(S2sError::Protocol(format!(
                "end-transaction responseCode={}",
                resp.status().as_u16()
            )));
        }
        let entity: TransactionResultEntity = resp.json().await.map_err(|e| {
            S2sError::Protocol(format!("malformed transaction result: {e}"))
        })?;
        debug!(
            path = %self.path,
            code = %code,
            flow_files = entity.flow_file_sent,
            "transaction ended"
        );
        Ok(entity)
    }

    /// Cancels the heartbeat task and waits for it to wind down, tolerating
    /// the cancellation signal but surfacing any other task failure.
    async fn stop_heartbeat(&mut self) -> Result<(), S2sError> {
        if let Some(hb) = self.heartbeat.take() {
            hb.cancel.cancel();
            match hb.handle.await {
                Ok(()) => {},
                Err(e) if e.is_cancelled() => {},
                Err(e) => {
                    return Err(S2sError::Transport(format!(
                        "heartbeat task failed: {e}"
                    )));
                },
            }
        }
        Ok(())
    }

    /// Hard release of every resource; used on transport/protocol failures.
    fn fail(&mut self) {
        self.state = TransactionState::Failed;
        if let Some(hb) = self.heartbeat.take() {
            hb.cancel.cancel();
            hb.handle.abort();
        }
        self.encoder = None;
        if let Some(response) = self.response.take() {
            response.abort();
        }
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if let Some(hb) = self.heartbeat.take() {
            hb.cancel.cancel();
            hb.handle.abort();
        }
        if let Some(response) = self.response.take() {
            response.abort();
        }
    }
}

/// Opens a transaction against the first cluster that answers, in declared
/// order. Connect-level failures rotate to the next cluster; contract
/// violations stop the rotation.
pub async fn begin_on_any(
    connectors: &[Arc<SiteToSiteConnector>],
    config: &ClientConfig,
) -> Result<Transaction, S2sError> {
    let mut last_err = None;
    for connector in connectors {
        match Transaction::begin(connector, config).await {
            Ok(txn) => return Ok(txn),
            Err(e @ S2sError::Transport(_)) => {
                warn!("cluster unavailable for transaction: {e}");
                last_err = Some(e);
            },
            Err(e) => return Err(e),
        }
    }
    Err(last_err
        .unwrap_or_else(|| S2sError::Transport("no remote clusters configured".to_string())))
}

/// Derives the transaction path from the `Location` header: the URL's path
/// (and query) with the FIRST `/nifi-api` occurrence stripped. Later
/// requests re-prefix it with the peer base.
pub fn transaction_path(location: &str) -> Result<String, S2sError> {
    let path = match reqwest::Url::parse(location) {
        Ok(url) => {
            let mut p = url.path().to_string();
            if let Some(q) = url.query() {
                p.push('?');
                p.push_str(q);
            }
            p
        },
        // A relative Location is already a path.
        Err(_) => location.to_string(),
    };
    let stripped = path.replacen("/nifi-api", "", 1);
    if stripped.is_empty() {
        return Err(S2sError::Protocol(format!(
            "Location {location:?} yields an empty transaction path"
        )));
    }
    Ok(stripped)
}
