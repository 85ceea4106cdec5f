use std::fmt;

bitflags::bitflags! {
    /// Per-layer behaviour bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SearchPathFlags: u32 {
        /// Survives `clear(keep_static = true)`.
        const STATIC = 1 << 0;
        /// Never selected as the write target.
        const NO_WRITE = 1 << 1;
        const GAME_DIR = 1 << 2;
        /// Mod or override data.
        const CUSTOM_PATH = 1 << 3;
        const READ_ONLY_GAME_DIR = 1 << 4;
        /// Do not mount `*.wad` files found inside this archive.
        const SKIP_ARCHIVED_WADS = 1 << 5;
        /// Layer is a WAD that was loaded out of another archive.
        const PACKED_WAD = 1 << 6;
    }
}

impl SearchPathFlags {
    /// Layers consulted when a lookup is restricted to the game directory.
    pub const GAMEDIR_SEARCH: SearchPathFlags = SearchPathFlags::GAME_DIR
        .union(SearchPathFlags::CUSTOM_PATH)
        .union(SearchPathFlags::READ_ONLY_GAME_DIR);

    pub fn visible_to(self, gamedir_only: bool) -> bool {
        !gamedir_only || self.intersects(Self::GAMEDIR_SEARCH)
    }

    pub fn parse_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "static" => Some(Self::STATIC),
            "nowrite" => Some(Self::NO_WRITE),
            "gamedir" => Some(Self::GAME_DIR),
            "custom" => Some(Self::CUSTOM_PATH),
            "rodir" => Some(Self::READ_ONLY_GAME_DIR),
            "nowads" => Some(Self::SKIP_ARCHIVED_WADS),
            _ => None,
        }
    }
}

impl fmt::Display for SearchPathFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(&name.to_ascii_lowercase())?;
            first = false;
        }
        Ok(())
    }
}
