//! Fuzz target for /proc/[pid]/statm parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcm_core::process::proc_stats::parse_statm_content;

fuzz_target!(|data: &str| {
    if let Some(mem) = parse_statm_content(data) {
        // Byte conversion saturates instead of overflowing.
        let _ = mem.rss_bytes();
    }
});
