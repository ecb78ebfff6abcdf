//! FetchXML paging cookie extraction

use once_cell::sync::Lazy;
use regex::Regex;

use super::PagingInfo;

static PAGING_COOKIE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)pagingcookie="(<cookie page="(\d+)".+</cookie>)"#)
        .expect("valid paging cookie regex")
});

/// Read the `@Microsoft.Dynamics.CRM.fetchxmlpagingcookie` annotation.
///
/// The cookie is URL-encoded twice by the server. Some aggregate queries return
/// an annotation without a `<cookie>` element; those fall back to an empty
/// cookie positioned at `current_page`.
pub fn parse_paging_cookie(annotation: Option<&str>, current_page: u32) -> PagingInfo {
    let current_page = current_page.max(1);
    let decoded = annotation.map(|raw| decode(&decode(raw))).unwrap_or_default();

    let parsed = PAGING_COOKIE.captures(&decoded).and_then(|caps| {
        let page = caps[2].parse::<u32>().ok()?;
        Some(PagingInfo {
            cookie: escape_attribute(&caps[1]),
            page,
            next_page: page + 1,
        })
    });

    parsed.unwrap_or(PagingInfo {
        cookie: String::new(),
        page: current_page,
        next_page: current_page + 1,
    })
}

fn decode(value: &str) -> String {
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

fn escape_attribute(value: &str) -> String {
    value
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_double_encoded_cookie() {
        let annotation = "<cookie pagenumber=\"2\" pagingcookie=\"%253ccookie%2520page%253d%25222%2522%253e%253caccountid%2520last%253d%2522%257bAAA%257d%2522%2520first%253d%2522%257bBBB%257d%2522%2520%252f%253e%253c%252fcookie%253e\" istracking=\"False\" />";

        let info = parse_paging_cookie(Some(annotation), 1);
        assert_eq!(info.page, 2);
        assert_eq!(info.next_page, 3);
        assert_eq!(
            info.cookie,
            "&lt;cookie page=&quot;2&quot;&gt;&lt;accountid last=&quot;{AAA}&quot; first=&quot;{BBB}&quot; /&gt;&lt;/cookie&gt;"
        );
    }

    #[test]
    fn test_plain_cookie() {
        let info =
            parse_paging_cookie(Some("pagingcookie=\"<cookie page=\"2\"><x /></cookie>\""), 1);
        assert_eq!(info.page, 2);
        assert_eq!(info.next_page, 3);
        assert!(info.cookie.starts_with("&lt;cookie page=&quot;2&quot;&gt;"));
    }

    #[test]
    fn test_fallback_without_cookie_element() {
        let info = parse_paging_cookie(Some("<cookie pagenumber=\"4\" istracking=\"False\" />"), 4);
        assert_eq!(
            info,
            PagingInfo {
                cookie: String::new(),
                page: 4,
                next_page: 5
            }
        );

        let info = parse_paging_cookie(None, 0);
        assert_eq!(info.page, 1);
        assert_eq!(info.next_page, 2);
    }
}
