//! Fuzz target for configuration document parsing.
//!
//! Arbitrary YAML and JSON must be rejected with an error, not a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcm_config::{parse_config_str, ConfigFormat};

fuzz_target!(|data: &str| {
    let _ = parse_config_str(data, ConfigFormat::Yaml);
    let _ = parse_config_str(data, ConfigFormat::Json);
});
