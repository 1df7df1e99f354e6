// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::fmt::Write;

use rand::RngExt;

/// Generates a random checkout id (8 bytes) used to stamp queue rows while a
/// drain has them in flight, returned as lowercase hex (no prefix).
pub fn generate_checkout_id() -> String {
    let mut raw = [0u8; 8];
    rand::rng().fill(&mut raw);

    let mut hex = String::with_capacity(16);
    for byte in &raw {
        write!(&mut hex, "{byte:02x}").expect("Writing to String cannot fail");
    }

    hex
}

/// Current wall-clock time in milliseconds since the epoch, as stored in the
/// queue's `created_at` column.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
