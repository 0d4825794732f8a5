// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use stockpile::library::import::{parse_entries, ImportEntry};

fuzz_target!(|data: &[u8]| {
    if let Ok(entries) = parse_entries(data) {
        for entry in entries {
            let _ = ImportEntry::from_value(entry);
        }
    }
});
