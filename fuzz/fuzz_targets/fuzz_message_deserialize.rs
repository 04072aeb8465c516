//! Fuzz target: `Message::deserialize` / `ResponseMessage::deserialize`
//!
//! Arbitrary bytes must either fail to parse or yield a message that
//! serializes back to something that parses to the same value.
//!
//! cargo fuzz run fuzz_message_deserialize

#![no_main]

use filamachine::message::{Message, ResponseMessage, StreamBuffer};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = Message::deserialize(&mut StreamBuffer::from(data)) {
        let mut out = StreamBuffer::new();
        message.serialize(&mut out).expect("re-serialize message");
        let again = Message::deserialize(&mut out).expect("re-parse message");
        assert_eq!(again, message);
        let _ = message.payload_json();
    }

    if let Ok(response) = ResponseMessage::deserialize(&mut StreamBuffer::from(data)) {
        let mut out = StreamBuffer::new();
        response.serialize(&mut out).expect("re-serialize response");
        let again = ResponseMessage::deserialize(&mut out).expect("re-parse response");
        assert_eq!(again, response);
        let _ = response.error_reason();
    }
});
