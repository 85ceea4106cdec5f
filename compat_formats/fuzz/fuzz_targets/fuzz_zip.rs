#![no_main]

use compat_formats::zip;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = zip::parse_zip(data);
});
