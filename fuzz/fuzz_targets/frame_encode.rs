//! Anything `encode` accepts must decode back to the same text.

#![no_main]

use framelink_core::FrameCodec;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|message: &str| {
    let Ok(frame) = FrameCodec::encode(message) else {
        return;
    };

    let mut codec = FrameCodec::new();
    let (header, payload) = frame.split_at(1);

    codec.read_buffer().copy_from_slice(header);
    assert_eq!(codec.complete_read(1), Ok(None));

    codec.read_buffer()[..payload.len()].copy_from_slice(payload);
    assert_eq!(codec.complete_read(payload.len()), Ok(Some(message.to_owned())));
});
