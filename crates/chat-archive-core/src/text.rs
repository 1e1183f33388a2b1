//! Case-insensitive string scanning shared by search, highlighting and
//! mention resolution.
//!
//! Case folding is ASCII-only, which keeps byte offsets stable between the
//! haystack and its folded form and matches SQLite's `LIKE` semantics.

/// Find the next ASCII case-insensitive occurrence of `needle` in
/// `haystack`, starting at byte offset `from`.
///
/// Returns the byte offset of the match. A match at offset 0 is a match.
/// An empty needle matches at `from` when `from` is within bounds.
pub fn find_ci(haystack: &str, needle: &str, from: usize) -> Option<usize> {
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    if from > hay.len() {
        return None;
    }
    if pat.is_empty() {
        return Some(from);
    }
    if pat.len() > hay.len() - from {
        return None;
    }

    (from..=hay.len() - pat.len())
        .find(|&start| hay[start..start + pat.len()].eq_ignore_ascii_case(pat))
}

/// Whether `haystack` contains `needle`, ignoring ASCII case.
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    find_ci(haystack, needle, 0).is_some()
}

/// Escape `%`, `_` and `\` so `query` can be embedded in a SQL `LIKE`
/// pattern with `ESCAPE '\'` and still match literally.
pub fn escape_like(query: &str) -> String {
    let mut out = String::with_capacity(query.len() + 2);
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_at_start() {
        assert_eq!(find_ci("hello world", "hello", 0), Some(0));
    }

    #[test]
    fn test_find_ignores_ascii_case() {
        assert_eq!(find_ci("Hello World", "WORLD", 0), Some(6));
        assert_eq!(find_ci("abcABC", "abc", 1), Some(3));
    }

    #[test]
    fn test_find_from_offset_skips_earlier() {
        assert_eq!(find_ci("aXaXa", "a", 1), Some(2));
        assert_eq!(find_ci("aXaXa", "a", 5), None);
    }

    #[test]
    fn test_find_missing() {
        assert_eq!(find_ci("short", "longer needle", 0), None);
        assert_eq!(find_ci("abc", "d", 0), None);
        assert_eq!(find_ci("abc", "a", 10), None);
    }

    #[test]
    fn test_find_multibyte_haystack() {
        let s = "café CAFÉ";
        let idx = find_ci(s, "caf", 1).unwrap();
        assert_eq!(&s[idx..idx + 3], "CAF");
        assert!(s.is_char_boundary(idx));
    }

    #[test]
    fn test_empty_needle() {
        assert_eq!(find_ci("abc", "", 2), Some(2));
        assert!(contains_ci("", ""));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }
}
