//! Glob matching used by every search: `*` matches any run of bytes including
//! path separators, `?` matches exactly one byte.

/// Returns true when `candidate` matches `pattern` in full.
///
/// Case folding, when requested, is ASCII-only; other bytes compare exactly.
pub fn matches(candidate: &str, pattern: &str, case_insensitive: bool) -> bool {
    let text = candidate.as_bytes();
    let pat = pattern.as_bytes();
    let eq = |a: u8, b: u8| {
        if case_insensitive {
            a.eq_ignore_ascii_case(&b)
        } else {
            a == b
        }
    };

    let mut ti = 0;
    let mut pi = 0;
    // last `*` seen and the text position it is currently absorbing up to
    let mut backtrack: Option<(usize, usize)> = None;
    while ti < text.len() {
        if pi < pat.len() && pat[pi] == b'*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if pi < pat.len() && (pat[pi] == b'?' || eq(pat[pi], text[ti])) {
            ti += 1;
            pi += 1;
        } else if let Some((star, absorbed)) = backtrack {
            pi = star + 1;
            ti = absorbed + 1;
            backtrack = Some((star, absorbed + 1));
        } else {
            return false;
        }
    }
    while pi < pat.len() && pat[pi] == b'*' {
        pi += 1;
    }
    pi == pat.len()
}
