#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok((message, line)) = horde::fuzzing::reencode_wire_line(data) {
        debug_assert!(line.ends_with('\n'));
        if let Ok((again, _)) = horde::fuzzing::reencode_wire_line(line.as_bytes()) {
            debug_assert_eq!(message, again);
        }
    }
});
