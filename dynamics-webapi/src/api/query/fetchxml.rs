//! FetchXML page injection

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};

use crate::error::ParameterError;

/// Root `<fetch>` start tag and its byte span in the source text
struct RootTag<'a> {
    start: usize,
    end: usize,
    element: BytesStart<'a>,
    empty: bool,
}

/// Set `page` (and `paging-cookie` when known) on the root `<fetch>` element.
///
/// Any XML declaration, comments or whitespace before the root are kept as
/// they are. Existing `page` / `paging-cookie` attributes are replaced. The
/// cookie is expected in its escaped form, as exposed by
/// [`crate::api::response::PagingInfo::cookie`].
pub fn inject_paging(
    fetch_xml: &str,
    page_number: Option<u32>,
    paging_cookie: Option<&str>,
    function_name: &str,
) -> Result<String, ParameterError> {
    let Some(page) = page_number else {
        return Ok(fetch_xml.to_string());
    };
    let invalid = || ParameterError::invalid_type(function_name, "request.fetchXml", "FetchXML");

    let root = find_root(fetch_xml).ok_or_else(invalid)?;
    let name = String::from_utf8_lossy(root.element.name().as_ref()).into_owned();
    let page = page.to_string();

    let mut element = BytesStart::new(name);
    element.push_attribute(("page".as_bytes(), page.as_bytes()));
    if let Some(cookie) = paging_cookie.filter(|c| !c.is_empty()) {
        element.push_attribute(("paging-cookie".as_bytes(), cookie.as_bytes()));
    }
    for attribute in root.element.attributes() {
        let attribute = attribute.map_err(|_| invalid())?;
        if !matches!(attribute.key.as_ref(), b"page" | b"paging-cookie") {
            element.push_attribute(attribute);
        }
    }

    let event = if root.empty {
        Event::Empty(element)
    } else {
        Event::Start(element)
    };
    let mut writer = Writer::new(Vec::new());
    writer.write_event(event).map_err(|_| invalid())?;
    let tag = String::from_utf8(writer.into_inner()).map_err(|_| invalid())?;

    let (before, after) = fetch_xml
        .get(..root.start)
        .zip(fetch_xml.get(root.end..))
        .ok_or_else(invalid)?;
    Ok(format!("{}{}{}", before, tag, after))
}

fn find_root(fetch_xml: &str) -> Option<RootTag<'_>> {
    let mut reader = Reader::from_str(fetch_xml);

    loop {
        let event = reader.read_event().ok()?;
        let end = usize::try_from(reader.buffer_position()).ok()?;

        let (element, empty) = match event {
            Event::Start(element) => (element, false),
            Event::Empty(element) => (element, true),
            Event::Eof => return None,
            _ => continue,
        };

        if element.name().as_ref() != b"fetch" {
            return None;
        }
        // Attribute values cannot hold a raw '<'
        let start = fetch_xml.get(..end)?.rfind('<')?;
        return Some(RootTag {
            start,
            end,
            element,
            empty,
        });
    }
}
