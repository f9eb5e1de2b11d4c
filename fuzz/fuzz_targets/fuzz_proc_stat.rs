//! Fuzz target for /proc/[pid]/stat parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcm_core::process::proc_stats::parse_stat_content;

fuzz_target!(|data: &str| {
    // Malformed input yields None, never a panic.
    let _ = parse_stat_content(data);
});
