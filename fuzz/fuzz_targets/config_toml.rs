#![no_main]

use horde::config::types::ConfigFile;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let parsed: Option<ConfigFile> = toml::from_str(input).ok();
        if let Ok(args) = horde::fuzzing::apply_config_from_toml(input) {
            if let Some(config) = parsed {
                debug_assert!(!config.users.is_empty());
                if let Some(users) = config.user_count {
                    debug_assert_eq!(args.users, Some(users));
                }
            }
        }
    }
});
