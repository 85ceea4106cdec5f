#![no_main]

use compat_formats::pak;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = pak::parse_pak(data) {
        for entry in index.entries() {
            let _ = index.entry_by_name(&entry.name);
        }
    }
});
