//! Read-time transforms applied to message bodies before display.
//!
//! [`render_message`] resolves mention tokens to display names first, then
//! escapes and highlights the result. Both passes scan with
//! [`find_ci`](crate::text::find_ci).

use crate::text::find_ci;

/// Number of digits in a mentioned user id.
pub const MENTION_DIGITS: usize = 18;

const MENTION_OPEN: &str = "<@";
const MENTION_TOKEN_LEN: usize = MENTION_OPEN.len() + MENTION_DIGITS + 1;

const HIGHLIGHT_OPEN: &str = "<span class='highlight'>";
const HIGHLIGHT_CLOSE: &str = "</span>";

/// If a well-formed mention token (`<@` + 18 digits + `>`) starts at byte
/// `start`, return its digits.
fn mention_at(body: &str, start: usize) -> Option<&str> {
    let token = body.as_bytes().get(start..start + MENTION_TOKEN_LEN)?;
    let digits = &token[MENTION_OPEN.len()..MENTION_TOKEN_LEN - 1];
    if token.starts_with(MENTION_OPEN.as_bytes())
        && digits.iter().all(u8::is_ascii_digit)
        && token[MENTION_TOKEN_LEN - 1] == b'>'
    {
        Some(&body[start + MENTION_OPEN.len()..start + MENTION_TOKEN_LEN - 1])
    } else {
        None
    }
}

/// External user ids of every well-formed mention token, in order.
pub fn mention_ids(body: &str) -> Vec<&str> {
    let mut ids = Vec::new();
    let mut pos = 0;
    while let Some(start) = find_ci(body, MENTION_OPEN, pos) {
        match mention_at(body, start) {
            Some(digits) => {
                ids.push(digits);
                pos = start + MENTION_TOKEN_LEN;
            }
            None => pos = start + MENTION_OPEN.len(),
        }
    }
    ids
}

/// Replace mention tokens with display names.
///
/// Tokens are resolved left to right through `lookup`. The first token that
/// `lookup` cannot resolve ends the scan and everything from that token on
/// is left untouched. Inserted names are never rescanned.
pub fn resolve_mentions<F>(body: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(body.len());
    let mut copied = 0;
    let mut pos = 0;

    while let Some(start) = find_ci(body, MENTION_OPEN, pos) {
        let Some(digits) = mention_at(body, start) else {
            pos = start + MENTION_OPEN.len();
            continue;
        };
        let Some(name) = lookup(digits) else {
            break;
        };
        out.push_str(&body[copied..start]);
        out.push_str(&name);
        pos = start + MENTION_TOKEN_LEN;
        copied = pos;
    }

    out.push_str(&body[copied..]);
    out
}

/// Escape `&`, `<` and `>` for use as HTML element content.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_segment(text: &str) -> String {
    escape_html(text).replace('\n', "<br>\n")
}

/// Escape `body`, turn newlines into `<br>` and wrap every non-overlapping,
/// case-insensitive occurrence of `query` in a highlight span.
///
/// Occurrences are located in the unescaped text, so entities and `<br>`
/// tags introduced here can never be matched or split by a highlight.
pub fn highlight(body: &str, query: Option<&str>) -> String {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return escape_segment(body);
    };

    let mut out = String::with_capacity(body.len() + 32);
    let mut index = 0;
    while let Some(found) = find_ci(body, query, index) {
        let end = found + query.len();
        out.push_str(&escape_segment(&body[index..found]));
        out.push_str(HIGHLIGHT_OPEN);
        out.push_str(&escape_segment(&body[found..end]));
        out.push_str(HIGHLIGHT_CLOSE);
        index = end;
    }
    out.push_str(&escape_segment(&body[index..]));
    out
}

/// Full read-time rendering: mentions, then escaping and highlighting.
pub fn render_message<F>(body: &str, query: Option<&str>, lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    highlight(&resolve_mentions(body, lookup), query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const ANN: &str = "123456789012345678";
    const BOB: &str = "876543210987654321";

    fn directory() -> HashMap<&'static str, String> {
        HashMap::from([(ANN, "Ann".to_string()), (BOB, "Bob".to_string())])
    }

    fn resolve(body: &str) -> String {
        let dir = directory();
        resolve_mentions(body, |id| dir.get(id).cloned())
    }

    #[test]
    fn test_mentions_resolved() {
        let body = format!("hi <@{}> and <@{}>!", ANN, BOB);
        assert_eq!(resolve(&body), "hi Ann and Bob!");
    }

    #[test]
    fn test_unresolvable_mention_stops_scan() {
        let body = format!("<@{}> <@{}> <@{}>", ANN, "111111111111111111", BOB);
        assert_eq!(resolve(&body), format!("Ann <@{}> <@{}>", "111111111111111111", BOB));
    }

    #[test]
    fn test_malformed_tokens_skipped() {
        let body = format!("<@123> <@12345678901234567x> <@{}>", ANN);
        assert_eq!(resolve(&body), "<@123> <@12345678901234567x> Ann");
        assert_eq!(resolve("trailing <@"), "trailing <@");
    }

    #[test]
    fn test_self_referencing_name_terminates() {
        let token = format!("<@{}>", ANN);
        let out = resolve_mentions(&format!("{} {}", token, token), |_| Some(token.clone()));
        assert_eq!(out, format!("{} {}", token, token));
    }

    #[test]
    fn test_mention_ids() {
        let body = format!("<@{}> x <@1> <@{}>", ANN, BOB);
        assert_eq!(mention_ids(&body), vec![ANN, BOB]);
        assert!(mention_ids("nothing here").is_empty());
    }

    #[test]
    fn test_escape_plain_text_unchanged() {
        assert_eq!(highlight("just words, \"quoted\"", None), "just words, \"quoted\"");
        assert_eq!(highlight("a\nb", None), "a<br>\nb");
    }

    #[test]
    fn test_escape_markup() {
        assert_eq!(
            highlight("<b>&</b>", None),
            "&lt;b&gt;&amp;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_empty_query_no_markup() {
        assert_eq!(highlight("hello", Some("")), "hello");
    }

    #[test]
    fn test_highlight_all_occurrences() {
        assert_eq!(
            highlight("one Two two", Some("two")),
            "one <span class='highlight'>Two</span> <span class='highlight'>two</span>"
        );
    }

    #[test]
    fn test_highlight_at_start() {
        assert_eq!(
            highlight("Hello there", Some("hello")),
            "<span class='highlight'>Hello</span> there"
        );
    }

    #[test]
    fn test_highlight_non_overlapping() {
        assert_eq!(
            highlight("aaaa", Some("aa")),
            "<span class='highlight'>aa</span><span class='highlight'>aa</span>"
        );
    }

    #[test]
    fn test_highlight_never_touches_inserted_markup() {
        assert_eq!(highlight("a\nb", Some("br")), "a<br>\nb");
        assert_eq!(highlight("fish & chips", Some("amp")), "fish &amp; chips");
        assert_eq!(
            highlight("x < y", Some("< y")),
            "x <span class='highlight'>&lt; y</span>"
        );
    }

    #[test]
    fn test_render_message_order() {
        let dir = directory();
        let body = format!("<@{}> said <hi>", ANN);
        let out = render_message(&body, Some("ann"), |id| dir.get(id).cloned());
        assert_eq!(out, "<span class='highlight'>Ann</span> said &lt;hi&gt;");
    }
}
