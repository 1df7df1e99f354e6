// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use anyhow::{Context, Result};
use s2s_client_rs::{
    cfg::{cli::config_path_from, config::QueuedClientConfig, logger::init_logger},
    handlers::{sink::LogSink, transfer::QueuedSiteToSiteClient},
    models::packet::DataPacket,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _init_logger = init_logger("tests/config_logger.yaml")?;

    // Load config (first CLI argument, S2S_CONFIG, or the test fixture)
    let path = config_path_from(std::env::args().nth(1), "tests/config.yaml")?;
    let cfg = QueuedClientConfig::load_from_file(&path)
        .with_context(|| format!("failed to load {path:?}"))?;

    let client = QueuedSiteToSiteClient::new(cfg, "s2s-queue.db")?;

    // Enqueue a couple of demo packets
    let packets = vec![
        DataPacket::from_bytes(
            HashMap::from([("source".to_string(), "demo".to_string())]),
            "hello from the edge",
        ),
        DataPacket::empty(HashMap::from([(
            "source".to_string(),
            "demo-empty".to_string(),
        )])),
    ];
    client.enqueue(&packets).await?;

    let stats = client.stats().await?;
    info!(rows = stats.rows, bytes = stats.bytes, "queue loaded");

    // Evict anything over the configured limits, then drain everything
    client.cleanup().await?;
    let report = client.drain(&LogSink).await?;
    info!(
        batches = report.batches,
        packets = report.packets,
        bytes = report.bytes,
        skipped = report.skipped,
        "drain report"
    );

    Ok(())
}
