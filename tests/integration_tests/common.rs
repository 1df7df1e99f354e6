// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! In-process mock of a NiFi cluster speaking the Site-to-Site HTTP
//! surface: peer listing, transaction creation, chunked flow-files upload
//! with CRC confirmation, TTL extension and end-transaction.

use std::{
    collections::HashMap,
    io::Read,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use anyhow::Result;
use s2s_client_rs::{
    cfg::config::{ClientConfig, ClusterConfig, QueuedClientConfig},
    handlers::sink::ResultSink,
    models::{
        error::S2sError,
        frame::{crc32_of, decode_frames},
        transaction::TransactionResult,
    },
};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, tcp::OwnedReadHalf},
    task::JoinHandle,
};

/// Everything the mock observed about one transaction.
#[derive(Debug, Clone, Default)]
pub struct TxnRecord {
    pub id: String,
    pub flow_files: Vec<(HashMap<String, String>, Vec<u8>)>,
    pub received_crc: Option<u32>,
    pub heartbeats: u64,
    pub end_code: Option<u8>,
}

pub struct ClusterState {
    ttl_seconds: u64,
    /// Reply to flow-files uploads with a corrupted CRC.
    pub wrong_checksum: AtomicBool,
    /// Treat uploaded bodies as deflate-compressed.
    pub expect_compressed: AtomicBool,
    next_txn: AtomicU64,
    transactions: Mutex<Vec<TxnRecord>>,
}

/// The mock cluster: one node listening on an ephemeral port.
pub struct MockCluster {
    pub addr: SocketAddr,
    pub state: Arc<ClusterState>,
    accept_task: JoinHandle<()>,
}

impl MockCluster {
    pub async fn start(ttl_seconds: u64) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ClusterState {
            ttl_seconds,
            wrong_checksum: AtomicBool::new(false),
            expect_compressed: AtomicBool::new(false),
            next_txn: AtomicU64::new(0),
            transactions: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    break;
                };
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, state, addr).await;
                });
            }
        });

        Ok(Self {
            addr,
            state,
            accept_task,
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/nifi-api", self.addr)
    }

    pub fn transactions(&self) -> Vec<TxnRecord> {
        self.state
            .transactions
            .lock()
            .expect("transactions lock")
            .clone()
    }
}

impl Drop for MockCluster {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn serve_connection(
    socket: TcpStream,
    state: Arc<ClusterState>,
    addr: SocketAddr,
) -> Result<()> {
    let (read_half, mut write_half) = socket.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let mut request_line = String::new();
        if reader.read_line(&mut request_line).await? == 0 {
            return Ok(());
        }
        let request_line = request_line.trim_end();
        if request_line.is_empty() {
            continue;
        }
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or("").to_string();
        let target = parts.next().unwrap_or("").to_string();

        let mut headers = HashMap::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
            }
        }

        let body = if let Some(len) = headers.get("content-length") {
            let n: usize = len.parse().unwrap_or(0);
            let mut buf = vec![0u8; n];
            reader.read_exact(&mut buf).await?;
            buf
        } else if headers
            .get("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
        {
            read_chunked(&mut reader).await?
        } else {
            Vec::new()
        };

        let (status, extra_headers, resp_body) =
            route(&method, &target, &body, &state, addr);

        let mut response = format!("HTTP/1.1 {status}\r\n");
        for (name, value) in &extra_headers {
            response.push_str(&format!("{name}: {value}\r\n"));
        }
        response.push_str(&format!("content-length: {}\r\n\r\n", resp_body.len()));
        write_half.write_all(response.as_bytes()).await?;
        write_half.write_all(&resp_body).await?;
        write_half.flush().await?;
    }
}

async fn read_chunked(reader: &mut BufReader<OwnedReadHalf>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line).await?;
        let size_str = size_line.trim().split(';').next().unwrap_or("");
        let size = usize::from_str_radix(size_str, 16)?;
        if size == 0 {
            loop {
                let mut trailer = String::new();
                if reader.read_line(&mut trailer).await? == 0 {
                    break;
                }
                if trailer.trim_end().is_empty() {
                    break;
                }
            }
            return Ok(out);
        }
        let start = out.len();
        out.resize(start + size, 0);
        reader.read_exact(&mut out[start..]).await?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf).await?;
    }
}

type RouteReply = (&'static str, Vec<(String, String)>, Vec<u8>);

fn route(
    method: &str,
    target: &str,
    body: &[u8],
    state: &ClusterState,
    addr: SocketAddr,
) -> RouteReply {
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };

    if method == "GET" && path.ends_with("/site-to-site/peers") {
        let listing = format!(
            "[{{\"hostname\":\"{}\",\"port\":{},\"secure\":false,\"flowFileCount\":0}}]",
            addr.ip(),
            addr.port()
        );
        return (
            "200 OK",
            vec![("content-type".to_string(), "application/json".to_string())],
            listing.into_bytes(),
        );
    }

    if method == "POST"
        && path.contains("/data-transfer/input-ports/")
        && path.ends_with("/transactions")
    {
        let n = state.next_txn.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("tx-{n}");
        state
            .transactions
            .lock()
            .expect("transactions lock")
            .push(TxnRecord {
                id: id.clone(),
                ..TxnRecord::default()
            });
        let location = format!("http://{addr}{path}/{id}");
        return (
            "201 Created",
            vec![
                ("Location".to_string(), location),
                (
                    "x-location-uri-intent".to_string(),
                    "transaction-url".to_string(),
                ),
                (
                    "x-nifi-site-to-site-server-transaction-ttl".to_string(),
                    state.ttl_seconds.to_string(),
                ),
            ],
            Vec::new(),
        );
    }

    if method == "POST" && path.ends_with("/flow-files") {
        let Some(id) = nth_segment_from_end(path, 1) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        let raw = if state.expect_compressed.load(Ordering::SeqCst) {
            let mut inflated = Vec::new();
            if flate2::read::ZlibDecoder::new(body)
                .read_to_end(&mut inflated)
                .is_err()
            {
                return ("400 Bad Request", Vec::new(), Vec::new());
            }
            inflated
        } else {
            body.to_vec()
        };
        let crc = crc32_of(&raw);
        let Ok(frames) = decode_frames(&raw) else {
            return ("400 Bad Request", Vec::new(), Vec::new());
        };

        let mut transactions = state.transactions.lock().expect("transactions lock");
        let Some(record) = transactions.iter_mut().find(|t| t.id == id) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        record.flow_files = frames;
        record.received_crc = Some(crc);

        let reported = if state.wrong_checksum.load(Ordering::SeqCst) {
            crc.wrapping_add(1)
        } else {
            crc
        };
        return (
            "200 OK",
            vec![("content-type".to_string(), "text/plain".to_string())],
            reported.to_string().into_bytes(),
        );
    }

    if method == "PUT" && path.contains("/transactions/") {
        let Some(id) = nth_segment_from_end(path, 0) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        let mut transactions = state.transactions.lock().expect("transactions lock");
        let Some(record) = transactions.iter_mut().find(|t| t.id == id) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        record.heartbeats += 1;
        return ("200 OK", Vec::new(), Vec::new());
    }

    if method == "DELETE" && path.contains("/transactions/") {
        let Some(id) = nth_segment_from_end(path, 0) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        let code: u8 = query
            .and_then(|q| {
                q.split('&')
                    .find_map(|kv| kv.strip_prefix("responseCode="))
            })
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let mut transactions = state.transactions.lock().expect("transactions lock");
        let Some(record) = transactions.iter_mut().find(|t| t.id == id) else {
            return ("404 Not Found", Vec::new(), Vec::new());
        };
        record.end_code = Some(code);
        let entity = format!(
            "{{\"responseCode\":{code},\"flowFileSent\":{},\"message\":\"mock\"}}",
            record.flow_files.len()
        );
        return (
            "200 OK",
            vec![("content-type".to_string(), "application/json".to_string())],
            entity.into_bytes(),
        );
    }

    ("404 Not Found", Vec::new(), Vec::new())
}

/// `nth_segment_from_end(path, 0)` is the last path segment, `1` the one
/// before it.
fn nth_segment_from_end(path: &str, n: usize) -> Option<String> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    segments
        .len()
        .checked_sub(n + 1)
        .and_then(|i| segments.get(i))
        .map(|s| s.to_string())
}

/// Transport config pointed at the mock cluster.
pub fn client_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        port_identifier: "e2e-port".to_string(),
        remote_clusters: vec![ClusterConfig {
            urls: vec![base_url.to_string()],
            proxy: None,
            credentials: None,
        }],
        use_compression: false,
        idle_connection_expiration: Duration::from_secs(30),
        preferred_batch_count: 100,
        preferred_batch_size_bytes: 0,
        preferred_batch_duration: Duration::ZERO,
        timeout: Duration::from_secs(10),
        peer_update_interval: Duration::from_secs(1800),
    }
}

/// Queued config pointed at the mock cluster.
pub fn queued_config(base_url: &str, batch_count: u64) -> QueuedClientConfig {
    let mut client = client_config(base_url);
    client.preferred_batch_count = batch_count;
    QueuedClientConfig {
        client,
        max_rows: 100_000,
        max_size_bytes: 0,
        max_age: Duration::from_secs(3600),
        max_transaction_time: Duration::from_secs(60),
    }
}

/// Sink that records every notification, as error strings for failures.
#[derive(Default)]
pub struct CollectingSink {
    queued: Mutex<Vec<Option<String>>>,
    transactions: Mutex<Vec<Option<String>>>,
}

impl CollectingSink {
    pub fn queued_calls(&self) -> Vec<Option<String>> {
        self.queued.lock().expect("queued lock").clone()
    }

    pub fn transaction_calls(&self) -> Vec<Option<String>> {
        self.transactions.lock().expect("transactions lock").clone()
    }
}

impl ResultSink for CollectingSink {
    fn on_transaction_result(&self, outcome: Result<&TransactionResult, &S2sError>) {
        self.transactions
            .lock()
            .expect("transactions lock")
            .push(outcome.err().map(|e| e.to_string()));
    }

    fn on_queued_result(&self, outcome: Result<(), &S2sError>) {
        self.queued
            .lock()
            .expect("queued lock")
            .push(outcome.err().map(|e| e.to_string()));
    }
}
