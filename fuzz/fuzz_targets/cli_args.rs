#![no_main]

use clap::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let mut args = Vec::new();
        args.push("horde".to_owned());
        for token in input.split_whitespace().take(64) {
            args.push(token.to_owned());
        }
        let arg_refs: Vec<&str> = args.iter().map(|value| value.as_str()).collect();
        if let Ok(parsed) = horde::args::HordeArgs::try_parse_from(arg_refs) {
            debug_assert!(!(parsed.master && parsed.worker));
            debug_assert!(parsed.heartbeat_liveness.get() >= 1);
            if let Some(run_time) = parsed.run_time {
                debug_assert!(!run_time.is_zero());
            }
        }
    }
});
