// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use s2s_client_rs::{
    client::peers::{Peer, normalize_base, rank_peers},
    models::peers::PeerEntry,
};

#[test]
fn test_peer_listing_parses() -> Result<()> {
    let json = r#"[
        {"hostname": "node-a", "port": 8080, "secure": false, "flowFileCount": 12},
        {"hostname": "node-b", "port": 8443, "secure": true,  "flowFileCount": 3},
        {"hostname": "node-c", "port": 8080}
    ]"#;
    let entries: Vec<PeerEntry> = serde_json::from_str(json)?;

    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].base_url(), "http://node-a:8080/nifi-api");
    assert_eq!(entries[1].base_url(), "https://node-b:8443/nifi-api");
    // secure and flowFileCount default when absent
    assert!(!entries[2].secure);
    assert_eq!(entries[2].flow_file_count, 0);
    Ok(())
}

#[test]
fn test_ranking_is_load_biased_with_stable_tie_break() {
    let mut peers = vec![
        Peer {
            url: "http://node-c:8080/nifi-api".to_string(),
            flow_file_count: 5,
        },
        Peer {
            url: "http://node-b:8080/nifi-api".to_string(),
            flow_file_count: 0,
        },
        Peer {
            url: "http://node-a:8080/nifi-api".to_string(),
            flow_file_count: 5,
        },
    ];
    rank_peers(&mut peers);

    let urls: Vec<_> = peers.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(
        urls,
        [
            "http://node-b:8080/nifi-api",
            "http://node-a:8080/nifi-api",
            "http://node-c:8080/nifi-api",
        ]
    );
}

#[test]
fn test_seed_urls_are_normalized() {
    assert_eq!(
        normalize_base("http://host:8080"),
        "http://host:8080/nifi-api"
    );
    assert_eq!(
        normalize_base("http://host:8080/"),
        "http://host:8080/nifi-api"
    );
    assert_eq!(
        normalize_base("http://host:8080/nifi-api"),
        "http://host:8080/nifi-api"
    );
    assert_eq!(
        normalize_base("http://host:8080/nifi-api/"),
        "http://host:8080/nifi-api"
    );
}
