//! Fuzz target for SendRequest::decode
//!
//! Client frames are untrusted. Decoding arbitrary bytes must never panic,
//! and anything that decodes must survive a re-encode.
//!
//! # Invariants
//!
//! - `decode` returns Err for invalid input, never panics
//! - Frames over the size limit are always rejected
//! - A decoded request re-encodes and decodes to the same value

#![no_main]

use courier_proto::{MAX_FRAME_BYTES, SendRequest};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(request) = SendRequest::decode(data) else {
        return;
    };
    assert!(data.len() <= MAX_FRAME_BYTES);

    let _ = request.message_kind();
    let _ = request.recipient_user();
    let _ = request.recipient_group();

    let encoded = request.encode().expect("decoded request must encode");
    if encoded.len() <= MAX_FRAME_BYTES {
        let again = SendRequest::decode(encoded.as_bytes()).expect("re-encoded request must decode");
        assert_eq!(again, request);
    }
});
