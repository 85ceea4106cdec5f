use crate::error::{FsError, FsResult};

/// Strips at most two leading `/` or `\`; some content references resources
/// as `/sound/foo.wav`.
pub fn strip_leading_separators(path: &str) -> &str {
    let mut rest = path;
    for _ in 0..2 {
        match rest.as_bytes().first() {
            Some(b'/') | Some(b'\\') => rest = &rest[1..],
            _ => break,
        }
    }
    rest
}

/// Rejects paths that could leave the mounted roots or that are not portable.
/// With `allow_direct` only the empty path is rejected.
pub fn check_path(path: &str, allow_direct: bool) -> FsResult<()> {
    if path.is_empty() {
        return Err(FsError::UnsafePath(path.to_string()));
    }
    if allow_direct {
        return Ok(());
    }
    let unsafe_path = path.contains(':')
        || path.contains("//")
        || path.contains("..")
        || path.starts_with('/')
        || path.contains("/.");
    if unsafe_path {
        return Err(FsError::UnsafePath(path.to_string()));
    }
    Ok(())
}

/// Produces the logical form of a caller-supplied path: leading separators
/// stripped, checked, `\` turned into `/`.
pub fn sanitize(path: &str, allow_direct: bool) -> FsResult<String> {
    let stripped = strip_leading_separators(path);
    let logical = stripped.replace('\\', "/");
    check_path(&logical, allow_direct)?;
    Ok(logical)
}

/// Splits `dir/sub/name.ext` into (`dir/sub/`, `name.ext`); the directory part
/// keeps its trailing separator and is empty for bare names.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind(['/', '\\']) {
        Some(pos) => path.split_at(pos + 1),
        None => ("", path),
    }
}

/// Extension of the final component without the dot, or "" when absent.
pub fn extension(path: &str) -> &str {
    let (_, name) = split_parent(path);
    match name.rfind('.') {
        Some(pos) => &name[pos + 1..],
        None => "",
    }
}

/// Final component with its extension removed.
pub fn file_stem(path: &str) -> &str {
    let (_, name) = split_parent(path);
    match name.rfind('.') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_two_leading_separators() {
        assert_eq!(strip_leading_separators("/sound/a.wav"), "sound/a.wav");
        assert_eq!(strip_leading_separators("\\/sound/a.wav"), "sound/a.wav");
        assert_eq!(strip_leading_separators("///sound"), "/sound");
    }

    #[test]
    fn rejects_nasty_paths() {
        for path in ["", "c:/windows", "a//b", "../secret", "a/../b", "a/.hidden"] {
            assert!(
                matches!(check_path(path, false), Err(FsError::UnsafePath(_))),
                "{path} should be rejected"
            );
        }
        assert!(check_path("maps/e1m1.bsp", false).is_ok());
        assert!(check_path("file.name.with.dots", false).is_ok());
    }

    #[test]
    fn direct_paths_allow_everything_but_empty() {
        assert!(check_path("../id1/config.cfg", true).is_ok());
        assert!(check_path("", true).is_err());
    }

    #[test]
    fn sanitize_normalizes_separators() {
        assert_eq!(
            sanitize("\\models\\player.mdl", false).unwrap(),
            "models/player.mdl"
        );
        assert!(sanitize("///x", false).is_err());
    }

    #[test]
    fn splits_names() {
        assert_eq!(split_parent("gfx/conchars.lmp"), ("gfx/", "conchars.lmp"));
        assert_eq!(split_parent("conchars"), ("", "conchars"));
        assert_eq!(extension("gfx.wad/conchars.lmp"), "lmp");
        assert_eq!(extension("gfx.dir/conchars"), "");
        assert_eq!(file_stem("halflife/{blue.mip"), "{blue");
    }
}
