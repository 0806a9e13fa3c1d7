//! Feed arbitrary read sizes and bytes through the frame decoder.
//!
//! The first byte of each chunk picks how many bytes the simulated read
//! returns; the decoder must never panic and must always end a completed read
//! back in a well-defined state.

#![no_main]

use framelink_core::{FrameCodec, FrameError, FrameState};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut codec = FrameCodec::new();
    let mut input = data;

    while let Some((&size, rest)) = input.split_first() {
        let buffer = codec.read_buffer();
        let n = (size as usize).min(buffer.len()).min(rest.len());
        buffer[..n].copy_from_slice(&rest[..n]);
        input = &rest[n..];

        let before = codec.state();
        match codec.complete_read(n) {
            Ok(Some(message)) => {
                assert_eq!(before, FrameState::AwaitingPayload);
                assert!(!message.is_empty());
                assert_eq!(codec.state(), FrameState::AwaitingHeader);
            },
            Ok(None) => assert_eq!(codec.state(), FrameState::AwaitingPayload),
            Err(FrameError::EndOfStream | FrameError::InvalidUtf8) => {
                assert_eq!(codec.state(), FrameState::AwaitingHeader);
            },
            Err(other) => panic!("decoder produced encode-side error: {other:?}"),
        }
    }
});
