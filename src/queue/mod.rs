// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Durable on-device packet queue over a single SQLite table.
//!
//! Rows carry monotonically increasing ids; a drain checks rows out by
//! stamping them with a random checkout id, which keeps them invisible to
//! concurrent drains until the batch is committed (rows deleted) or rolled
//! back (stamp cleared). The open procedure clears every stamp, so a
//! process that died mid-drain leaves nothing checked out.

use std::{collections::HashMap, path::Path, time::Duration};

use bytes::Bytes;
use rusqlite::{Connection, ToSql, params};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    cfg::config::QueuedClientConfig,
    models::{error::S2sError, packet::DataPacket},
    utils::{generate_checkout_id, now_millis},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packets (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    created_at     INTEGER NOT NULL,
    attributes     BLOB    NOT NULL,
    content        BLOB    NOT NULL,
    content_size   INTEGER NOT NULL,
    transaction_id TEXT    NULL
);
CREATE INDEX IF NOT EXISTS idx_packets_created_at ON packets (created_at);
";

/// SQLite caps bound variables per statement; id lists are chunked well
/// under it.
const ID_CHUNK: usize = 500;

/// Eviction triggers of the queue, taken from the queued client config.
#[derive(Debug, Clone)]
struct QueueLimits {
    max_rows: u64,
    max_size_bytes: u64,
    max_age: Duration,
}

/// Row counts and cumulative payload bytes currently persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub rows: u64,
    pub bytes: u64,
}

/// One persisted packet.
#[derive(Debug, Clone)]
pub struct QueueRow {
    pub id: i64,
    pub created_at: i64,
    pub attributes: HashMap<String, String>,
    pub content: Bytes,
    pub content_size: u64,
}

impl QueueRow {
    pub fn to_packet(&self) -> DataPacket {
        DataPacket::from_bytes(self.attributes.clone(), self.content.clone())
    }
}

/// A checked-out set of rows, newest first. Dropping the handle without
/// committing leaves the rows stamped until `rollback` or the next queue
/// open.
#[derive(Debug)]
pub struct QueueBatch {
    checkout_id: String,
    rows: Vec<QueueRow>,
}

impl QueueBatch {
    fn empty() -> Self {
        Self {
            checkout_id: String::new(),
            rows: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.rows.iter().map(|r| r.content_size).sum()
    }

    /// Rows in drain order (most recent first).
    pub fn rows(&self) -> &[QueueRow] {
        &self.rows
    }

    pub fn packets(&self) -> impl Iterator<Item = DataPacket> + '_ {
        self.rows.iter().map(QueueRow::to_packet)
    }
}

/// The queue itself. Per-call mutations are serialized by the connection
/// lock; multi-statement operations run inside SQL transactions.
pub struct DurableQueue {
    conn: Mutex<Connection>,
    limits: QueueLimits,
}

impl DurableQueue {
    /// Opens (or creates) the backing database and rolls back any rows a
    /// previous process left checked out.
    pub fn open<P: AsRef<Path>>(
        path: P,
        config: &QueuedClientConfig,
    ) -> Result<Self, S2sError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        let reclaimed = conn.execute("UPDATE packets SET transaction_id = NULL", [])?;
        if reclaimed > 0 {
            warn!(reclaimed, "reclaimed rows left checked out by a previous run");
        }
        Ok(Self {
            conn: Mutex::new(conn),
            limits: QueueLimits {
                max_rows: config.max_rows,
                max_size_bytes: config.max_size_bytes,
                max_age: config.max_age,
            },
        })
    }

    /// Persists the packets in insertion order within a single SQL
    /// transaction. File-backed payloads are materialized first, outside
    /// the connection lock.
    pub async fn enqueue(&self, packets: &[DataPacket]) -> Result<(), S2sError> {
        let mut staged = Vec::with_capacity(packets.len());
        for packet in packets {
            let attrs = serde_json::to_vec(packet.attributes())?;
            let content = packet.read_to_bytes().await?;
            staged.push((attrs, content));
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO packets (created_at, attributes, content, content_size, \
                 transaction_id) VALUES (?1, ?2, ?3, ?4, NULL)",
            )?;
            let now = now_millis();
            for (attrs, content) in &staged {
                stmt.execute(params![
                    now,
                    attrs,
                    &content[..],
                    content.len() as i64
                ])?;
            }
        }
        tx.commit()?;
        debug!(count = staged.len(), "packets enqueued");
        Ok(())
    }

    /// Selects and checks out the next batch: up to `max_count` of the
    /// highest-id rows whose cumulative size stays within `max_size`,
    /// skipping checked-out and expired rows. Zero disables a limit. The
    /// first row is always taken so an oversized packet cannot wedge the
    /// queue.
    pub async fn next_batch(
        &self,
        max_count: u64,
        max_size: u64,
        max_age: Duration,
    ) -> Result<QueueBatch, S2sError> {
        let cutoff = if max_age.is_zero() {
            i64::MIN
        } else {
            now_millis() - max_age.as_millis() as i64
        };

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let mut selected: Vec<QueueRow> = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT id, created_at, attributes, content, content_size FROM packets \
                 WHERE transaction_id IS NULL AND created_at >= ?1 ORDER BY id DESC",
            )?;
            let mut rows = stmt.query(params![cutoff])?;
            let mut total: u64 = 0;
            while let Some(row) = rows.next()? {
                if max_count > 0 && selected.len() as u64 >= max_count {
                    break;
                }
                let content_size: i64 = row.get(4)?;
                let content_size = content_size.max(0) as u64;
                if max_size > 0
                    && !selected.is_empty()
                    && total + content_size > max_size
                {
                    break;
                }
                let attrs_blob: Vec<u8> = row.get(2)?;
                let content: Vec<u8> = row.get(3)?;
                selected.push(QueueRow {
                    id: row.get(0)?,
                    created_at: row.get(1)?,
                    attributes: serde_json::from_slice(&attrs_blob)?,
                    content: Bytes::from(content),
                    content_size,
                });
                total += content_size;
            }
        }

        if selected.is_empty() {
            tx.commit()?;
            return Ok(QueueBatch::empty());
        }

        let checkout_id = generate_checkout_id();
        let ids: Vec<i64> = selected.iter().map(|r| r.id).collect();
        for chunk in ids.chunks(ID_CHUNK) {
            let mut sql =
                String::from("UPDATE packets SET transaction_id = ?1 WHERE id IN (");
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&format!("?{}", i + 2));
            }
            sql.push(')');
            let mut args: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() + 1);
            args.push(&checkout_id);
            for id in chunk {
                args.push(id);
            }
            tx.execute(&sql, args.as_slice())?;
        }
        tx.commit()?;

        debug!(
            %checkout_id,
            count = selected.len(),
            "batch checked out"
        );
        Ok(QueueBatch {
            checkout_id,
            rows: selected,
        })
    }

    /// Deletes the batch's rows; they were acknowledged by the server.
    pub async fn commit(&self, batch: &QueueBatch) -> Result<(), S2sError> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM packets WHERE transaction_id = ?1",
            params![batch.checkout_id],
        )?;
        debug!(checkout_id = %batch.checkout_id, deleted, "batch committed");
        Ok(())
    }

    /// Clears the batch's stamp, making its rows visible to the next drain.
    pub async fn rollback(&self, batch: &QueueBatch) -> Result<(), S2sError> {
        if batch.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().await;
        let restored = conn.execute(
            "UPDATE packets SET transaction_id = NULL WHERE transaction_id = ?1",
            params![batch.checkout_id],
        )?;
        debug!(checkout_id = %batch.checkout_id, restored, "batch rolled back");
        Ok(())
    }

    /// Evicts rows until the age, row-count and byte limits all hold.
    /// Oldest rows (lowest ids) go first; checked-out rows are never
    /// touched. Idempotent.
    pub async fn cleanup(&self) -> Result<(), S2sError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        if !self.limits.max_age.is_zero() {
            let cutoff = now_millis() - self.limits.max_age.as_millis() as i64;
            let expired = tx.execute(
                "DELETE FROM packets WHERE transaction_id IS NULL AND created_at < ?1",
                params![cutoff],
            )?;
            if expired > 0 {
                debug!(expired, "expired rows evicted");
            }
        }

        if self.limits.max_rows > 0 {
            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM packets WHERE transaction_id IS NULL",
                [],
                |r| r.get(0),
            )?;
            let excess = count - self.limits.max_rows as i64;
            if excess > 0 {
                tx.execute(
                    "DELETE FROM packets WHERE id IN (SELECT id FROM packets WHERE \
                     transaction_id IS NULL ORDER BY id ASC LIMIT ?1)",
                    params![excess],
                )?;
                debug!(excess, "rows evicted over the row-count limit");
            }
        }

        if self.limits.max_size_bytes > 0 {
            let total: i64 = tx.query_row(
                "SELECT COALESCE(SUM(content_size), 0) FROM packets WHERE \
                 transaction_id IS NULL",
                [],
                |r| r.get(0),
            )?;
            let mut over = total - self.limits.max_size_bytes as i64;
            if over > 0 {
                let mut doomed: Vec<i64> = Vec::new();
                {
                    let mut stmt = tx.prepare(
                        "SELECT id, content_size FROM packets WHERE transaction_id IS \
                         NULL ORDER BY id ASC",
                    )?;
                    let mut rows = stmt.query([])?;
                    while over > 0 {
                        let Some(row) = rows.next()? else { break };
                        let id: i64 = row.get(0)?;
                        let size: i64 = row.get(1)?;
                        doomed.push(id);
                        over -= size;
                    }
                }
                for chunk in doomed.chunks(ID_CHUNK) {
                    let mut sql = String::from("DELETE FROM packets WHERE id IN (");
                    for i in 0..chunk.len() {
                        if i > 0 {
                            sql.push(',');
                        }
                        sql.push_str(&format!("?{}", i + 1));
                    }
                    sql.push(')');
                    let args: Vec<&dyn ToSql> =
                        chunk.iter().map(|id| id as &dyn ToSql).collect();
                    tx.execute(&sql, args.as_slice())?;
                }
                debug!(evicted = doomed.len(), "rows evicted over the byte limit");
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Row count and cumulative payload bytes, checked-out rows included.
    pub async fn stats(&self) -> Result<QueueStats, S2sError> {
        let conn = self.conn.lock().await;
        let (rows, bytes): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(content_size), 0) FROM packets",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(QueueStats {
            rows: rows.max(0) as u64,
            bytes: bytes.max(0) as u64,
        })
    }
}
