//! Fuzz test for durable key encoding
//!
//! `CollectionKey::decode` must reject or accept arbitrary bytes without
//! panicking, and anything it accepts must encode back to the same bytes.
//!
//! Run with: cargo +nightly fuzz run collection_key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use marketcache_storage::CollectionKey;

fuzz_target!(|data: &[u8]| {
    if let Some(key) = CollectionKey::decode(data) {
        assert_eq!(key.encode(), data, "decode/encode mismatch");
        assert!(data.starts_with(&CollectionKey::collection_prefix(key.collection())));
    }
});
