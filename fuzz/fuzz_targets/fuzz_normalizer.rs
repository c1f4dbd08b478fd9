//! Fuzz target: `Normalizer::try_normalize`
//!
//! The first byte picks the topic category; the rest is the payload.
//! Asserts that normalization never panics, that every sensor record
//! carries a non-empty key and display value, and that a failed parse
//! yields no updates through the total `normalize` variant.
//!
//! cargo fuzz run fuzz_normalizer

#![no_main]

use libfuzzer_sys::fuzz_target;
use statusdeck::telemetry::{Normalizer, Update};

const TOPICS: [&str; 4] = ["sensors/lab", "Sensors/hall/1", "vps/monitor", "weather/today"];

fuzz_target!(|data: &[u8]| {
    let Some((&selector, payload)) = data.split_first() else {
        return;
    };
    let topic = TOPICS[usize::from(selector) % TOPICS.len()];
    let normalizer = Normalizer::default();

    match normalizer.try_normalize(topic, payload) {
        Ok(updates) => {
            for update in &updates {
                if let Update::Sensor(record) = update {
                    assert!(!record.key.is_empty(), "empty sensor key");
                    assert!(!record.display_value.is_empty(), "empty display value");
                }
            }
        }
        Err(_) => assert!(normalizer.normalize(topic, payload).is_empty()),
    }
});
