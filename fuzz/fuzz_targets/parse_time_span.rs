#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(duration) = horde::fuzzing::parse_time_span_input(input) {
            debug_assert!(duration.as_secs() < u64::MAX);
        }
    }
});
