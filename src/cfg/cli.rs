// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Environment override for the client config location.
pub const CONFIG_ENV: &str = "S2S_CONFIG";

/// Picks the config location: explicit CLI argument first, then the
/// `S2S_CONFIG` environment variable, then the built-in default.
pub fn config_path_from(arg: Option<String>, default: &str) -> Result<PathBuf> {
    let chosen = arg
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| default.to_string());
    resolve_config_path(&chosen)
}

/// Makes a config path absolute and canonical, failing early when the file
/// does not exist.
pub fn resolve_config_path(rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
