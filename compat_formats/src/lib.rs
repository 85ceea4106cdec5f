#![forbid(unsafe_code)]

//! Readers for the archive containers a game directory can carry: Quake PAK,
//! WAD2/WAD3 texture archives, ZIP/PK3 and Valve VPK packages.
//!
//! Every reader parses the container's directory once into a flat index and
//! never holds on to member bytes; callers read members through their own
//! handles using the offsets recorded here.

mod le;
pub mod pak;
pub mod vpk;
pub mod wad;
pub mod zip;

/// Normalizes an archive member name: strips NUL padding, unifies separators to
/// `/`, drops leading separators and folds ASCII case.
pub fn normalize_name(name: &str) -> String {
    let trimmed = name.trim_matches(char::from(0));
    let unified = trimmed.replace('\\', "/");
    unified.trim_start_matches('/').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_folds_case_and_separators() {
        assert_eq!(normalize_name("Sound\\Foo.WAV\0\0"), "sound/foo.wav");
        assert_eq!(normalize_name("/maps/e1m1.bsp"), "maps/e1m1.bsp");
    }
}
