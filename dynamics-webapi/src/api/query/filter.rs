//! `$filter` normalization

use once_cell::sync::Lazy;
use regex::Regex;

static BRACED_GUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([0-9a-fA-F]{8}-?(?:[0-9a-fA-F]{4}-?){3}[0-9a-fA-F]{12})\}")
        .expect("valid braced GUID regex")
});

/// Strip the braces from `{GUID}` literals outside quoted string literals.
///
/// `accountid eq {00000000-...}` becomes `accountid eq 00000000-...`, while
/// `name eq '{00000000-...}'` is left as written.
pub fn remove_guid_braces(filter: &str) -> String {
    let mut result = String::with_capacity(filter.len());
    let mut segment_start = 0;
    let mut open_quote: Option<char> = None;

    for (index, ch) in filter.char_indices() {
        match open_quote {
            None if ch == '\'' || ch == '"' => {
                result.push_str(&BRACED_GUID.replace_all(&filter[segment_start..index], "$1"));
                segment_start = index;
                open_quote = Some(ch);
            }
            // A doubled '' escape closes and immediately reopens; the text stays untouched
            Some(quote) if ch == quote => {
                result.push_str(&filter[segment_start..=index]);
                segment_start = index + 1;
                open_quote = None;
            }
            _ => {}
        }
    }

    let rest = &filter[segment_start..];
    if open_quote.is_some() {
        result.push_str(rest);
    } else {
        result.push_str(&BRACED_GUID.replace_all(rest, "$1"));
    }

    result
}
