#![no_main]

use compat_formats::vpk;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = vpk::parse_vpk(data) {
        let _ = index.referenced_parts();
    }
});
