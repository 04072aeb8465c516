//! Fuzz target: `FrameDecoder`
//!
//! Feeds arbitrary bytes, split at a fuzzer-chosen point, into the
//! stream decoder and asserts that it never panics, never yields a frame
//! above `MAX_FRAME_SIZE` and never loses track of buffered bytes.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use filamachine::message::codec::{FrameDecoder, HEADER_SIZE, MAX_FRAME_SIZE};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |b| usize::from(*b)).min(data.len());
    let mut decoder = FrameDecoder::new();

    for chunk in [&data[..split], &data[split..]] {
        decoder.feed(chunk);
        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => assert!(frame.len() <= MAX_FRAME_SIZE),
                Ok(None) => break,
                // out of sync: the buffer was dropped
                Err(_) => {
                    assert_eq!(decoder.buffered(), 0);
                    break;
                }
            }
        }
    }

    // Whatever remains is an incomplete frame.
    assert!(decoder.buffered() <= HEADER_SIZE + MAX_FRAME_SIZE);

    decoder.reset();
    assert_eq!(decoder.buffered(), 0);
});
