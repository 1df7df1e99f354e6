// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Peer bookkeeping for one remote cluster.
//!
//! The list is load-biased: peers are ranked by ascending reported
//! flow-file count with a stable URL tie-break, and the ranking is renewed
//! from `/site-to-site/peers` when it goes stale or after a connect-level
//! failure invalidates it.

use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::peers::PeerEntry;

/// One reachable cluster node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    /// API base of the node, `/nifi-api` included.
    pub url: String,
    /// Load indicator reported by the peers listing; lower drains first.
    pub flow_file_count: u64,
}

#[derive(Debug, Default)]
struct PeerState {
    peers: Vec<Peer>,
    last_refresh: Option<Instant>,
}

/// Ranked peer list plus its freshness clock. Updates go through a
/// single-writer lock; readers only ever see a fully replaced list.
#[derive(Debug)]
pub struct PeerCluster {
    seeds: Vec<String>,
    update_interval: Duration,
    state: RwLock<PeerState>,
}

impl PeerCluster {
    pub fn new(seed_urls: &[String], update_interval: Duration) -> Self {
        let seeds = seed_urls
            .iter()
            .filter(|u| !u.is_empty())
            .map(|u| normalize_base(u))
            .collect();
        Self {
            seeds,
            update_interval,
            state: RwLock::new(PeerState::default()),
        }
    }

    /// Candidate API bases in drain-preference order: the ranked peer list
    /// when one is held, the configured seeds otherwise.
    pub async fn ranked_bases(&self) -> Vec<String> {
        let state = self.state.read().await;
        if state.peers.is_empty() {
            self.seeds.clone()
        } else {
            state.peers.iter().map(|p| p.url.clone()).collect()
        }
    }

    /// Bases to ask for a fresh peer listing: known peers first, then any
    /// seed not already among them.
    pub async fn refresh_candidates(&self) -> Vec<String> {
        let mut out = self.ranked_bases().await;
        for seed in &self.seeds {
            if !out.contains(seed) {
                out.push(seed.clone());
            }
        }
        out
    }

    /// Whether the held list is too old to trust.
    pub async fn is_stale(&self) -> bool {
        let state = self.state.read().await;
        match state.last_refresh {
            Some(at) => at.elapsed() > self.update_interval,
            None => true,
        }
    }

    /// Forces the next `is_stale` to report true; called after a
    /// connect-level failure against a listed peer.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.last_refresh = None;
    }

    /// Replaces the peer list with a freshly fetched listing.
    pub async fn replace(&self, entries: Vec<PeerEntry>) {
        let mut peers: Vec<Peer> = entries
            .into_iter()
            .map(|e| Peer {
                url: e.base_url(),
                flow_file_count: e.flow_file_count,
            })
            .collect();
        rank_peers(&mut peers);

        if peers.is_empty() {
            warn!("peer listing was empty; keeping previous peer list");
            return;
        }

        debug!(count = peers.len(), "peer list replaced");
        let mut state = self.state.write().await;
        state.peers = peers;
        state.last_refresh = Some(Instant::now());
    }
}

/// Ascending flow-file count, URL as the stable tie-break.
pub fn rank_peers(peers: &mut [Peer]) {
    peers.sort_by(|a, b| {
        a.flow_file_count
            .cmp(&b.flow_file_count)
            .then_with(|| a.url.cmp(&b.url))
    });
}

/// Normalizes a seed URL into an API base: trailing slash trimmed,
/// `/nifi-api` appended when missing.
pub fn normalize_base(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    if trimmed.ends_with("/nifi-api") {
        trimmed.to_string()
    } else {
        format!("{trimmed}/nifi-api")
    }
}
