//! Fuzz test for the stored envelope decoder
//!
//! Durable records may be truncated, hand-edited or written by another
//! version of the service. Decoding arbitrary bytes must never panic, and a
//! decoded envelope must answer freshness queries without panicking.
//!
//! Run with: cargo +nightly fuzz run envelope_decode_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use marketcache_core::ManualClock;
use marketcache_storage::TtlEnvelope;

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = TtlEnvelope::decode(data) else {
        return;
    };

    let clock = ManualClock::starting_now();
    let expired = envelope.is_expired(None, &clock);
    let _ = envelope.is_expired(Some(u64::MAX), &clock);

    // Without a readable timestamp an envelope is always expired.
    if envelope.written_at().is_none() {
        assert!(expired, "envelope without writtenAt reported fresh");
    }

    // Whatever decoded must encode again.
    let bytes = envelope.encode().expect("re-encode decoded envelope");
    let again = TtlEnvelope::decode(&bytes).expect("decode re-encoded envelope");
    assert_eq!(again.ttl_ms(), envelope.ttl_ms());
});
