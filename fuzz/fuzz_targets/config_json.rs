#![no_main]

use horde::config::types::ConfigFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let parsed: Option<ConfigFile> = serde_json::from_slice(data).ok();
    if let Ok(args) = horde::fuzzing::apply_config_from_json(data) {
        if let Some(config) = parsed {
            debug_assert!(!config.users.is_empty());
            if let Some(users) = config.user_count {
                debug_assert_eq!(args.users, Some(users));
            }
        }
    }
});
