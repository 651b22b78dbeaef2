//! Fuzz target for lorebook settings decoding.
//!
//! Run with: cargo +nightly fuzz run fuzz_settings_decode
//!
//! Feeds arbitrary input to the lenient JSON settings decoder and the TOML
//! config parser, then resolves whatever came out for a few speakers.

#![no_main]

use libfuzzer_sys::fuzz_target;
use loreweave_config::{AppConfig, GroupSettings};
use loreweave_core::{GlobalBudgetContext, SpeakingContext, allocate, resolve};

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let _ = AppConfig::parse(s);

    let Ok(value) = serde_json::from_str::<serde_json::Value>(s) else {
        return;
    };
    let settings = GroupSettings::from_json_lenient(&value);
    let _ = settings.validate("fuzz");

    let global = GlobalBudgetContext::default();
    let mut speakers = vec![SpeakingContext::single_party()];
    speakers.extend(
        settings
            .character_overrides
            .keys()
            .map(|name| SpeakingContext::speaking(name.clone())),
    );
    for speaking in &speakers {
        let resolved = resolve(&settings, speaking);
        assert!((1..=5).contains(&resolved.priority.get()));
        let _ = allocate(&resolved, &global);
    }
});
