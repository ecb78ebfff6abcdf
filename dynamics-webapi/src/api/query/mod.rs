//! OData URL and query-option composition
//!
//! Turns a [`crate::api::Request`] into the path plus query string that follows
//! the data API URL, recursing into structured `$expand` sub-requests.

pub mod compose;
pub mod fetchxml;
pub mod filter;

pub use compose::compose_path;
pub use fetchxml::inject_paging;
pub use filter::remove_guid_braces;

/// Percent-encode like `encodeURIComponent`: everything except
/// `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_uri_component(value: &str) -> String {
    urlencoding::encode(value)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}
