#![no_main]

use libfuzzer_sys::fuzz_target;
use mayhem::protocol::frame;

fuzz_target!(|data: &[u8]| {
    if let Ok(raw) = std::str::from_utf8(data) {
        // A decoded frame must survive re-encoding unchanged, unless its text
        // carried line breaks that encoding flattens.
        if let Ok(Some(message)) = frame::decode(raw) {
            if !message.text.contains(['\n', '\r']) {
                let again = frame::decode(&message.encode());
                assert_eq!(again, Ok(Some(message)));
            }
        }
    }
});
