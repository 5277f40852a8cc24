#![no_main]

use libfuzzer_sys::fuzz_target;
use mayhem::config::schema::MayhemConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(json_value) = serde_json::from_slice::<serde_json::Value>(data) {
        let _: Result<MayhemConfig, _> = serde_json::from_value(json_value);
    }
});
