//! Fuzz target: `PacketDecoder`
//!
//! Drives arbitrary byte sequences into the streaming MQTT decoder, split
//! at a fuzzer-chosen point, and asserts that it never panics, that every
//! decoded packet re-encodes, and that the decoder recovers after `reset`.
//!
//! cargo fuzz run fuzz_packet_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use statusdeck::mqtt::codec::{self, MAX_PACKET_SIZE, PacketDecoder};

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let at = usize::from(split).min(rest.len());

    let mut decoder = PacketDecoder::new();
    decoder.feed(&rest[..at]);
    while let Ok(Some(_)) = decoder.next_packet() {}
    decoder.feed(&rest[at..]);
    while let Ok(Some(packet)) = decoder.next_packet() {
        let bytes = codec::to_bytes(&packet).expect("decoded packet must re-encode");
        assert!(bytes.len() <= MAX_PACKET_SIZE + 5, "re-encoded packet exceeds limit");
    }

    // After a reset the decoder must accept bytes cleanly again.
    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
    decoder.feed(rest);
    let _ = decoder.next_packet();
});
