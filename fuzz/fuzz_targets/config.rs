//! Fuzz target for TOML configuration parsing.
//!
//! Arbitrary text is parsed as a `SearchConfig` and validated. Both steps
//! must return errors on bad input rather than panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

use passage_search::SearchConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data)
        && let Ok(cfg) = toml::from_str::<SearchConfig>(text)
    {
        let _ = cfg.validate();
    }
});
