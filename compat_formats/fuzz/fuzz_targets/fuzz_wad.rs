#![no_main]

use compat_formats::wad::{self, LumpFilter};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(index) = wad::parse_wad(data) {
        for lump in index.lumps() {
            let _ = index.find(&lump.name, LumpFilter::Only(lump.lump_type));
        }
    }
});
