//! `$batch` multipart serializer
//!
//! Consecutive non-GET requests share one changeset (the OData unit of
//! atomicity); a GET, or a request that opted out of changesets, closes the
//! open changeset and is written directly under the batch boundary.

use std::collections::BTreeMap;

use log::{debug, trace};
use uuid::Uuid;

use crate::api::http::{ComposedRequest, RequestBody};
use crate::api::request::Method;

const CRLF: &str = "\r\n";

/// First automatic Content-ID is one above this; caller ids stay below it
const CONTENT_ID_BASE: u32 = 100_000;

/// One serialized `$batch` call
#[derive(Debug, Clone, PartialEq)]
pub struct BatchEnvelope {
    pub boundary: String,
    /// Outer headers; `Content-Type: multipart/mixed;boundary=...`
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl BatchEnvelope {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Serialize requests into one multipart body, in submission order
pub fn convert_to_batch(requests: &[ComposedRequest], data_api_url: &str) -> BatchEnvelope {
    convert_to_batch_with(requests, data_api_url, Uuid::new_v4)
}

/// Same as [`convert_to_batch`] with a caller-supplied id source for boundaries
pub fn convert_to_batch_with<F>(
    requests: &[ComposedRequest],
    data_api_url: &str,
    mut new_id: F,
) -> BatchEnvelope
where
    F: FnMut() -> Uuid,
{
    let batch_boundary = format!("batch_{}", new_id());
    let mut writer = PartWriter::default();
    let mut changeset: Option<String> = None;
    let mut content_id = CONTENT_ID_BASE;

    for (index, request) in requests.iter().enumerate() {
        let in_change_set = request.method != Method::Get && request.in_change_set;

        if !in_change_set {
            if let Some(open) = changeset.take() {
                trace!("Closing changeset {} before request {}", open, index);
                writer.line(&format!("--{}--", open));
                content_id = CONTENT_ID_BASE;
            }
        }

        if changeset.is_none() {
            writer.line(&format!("--{}", batch_boundary));
            if in_change_set {
                let boundary = format!("changeset_{}", new_id());
                debug!("Opening changeset {} at request {}", boundary, index);
                writer.line(&format!("Content-Type: multipart/mixed;boundary={}", boundary));
                writer.line("");
                changeset = Some(boundary);
            }
        }

        if let Some(open) = &changeset {
            writer.line(&format!("--{}", open));
        }

        writer.line("Content-Type: application/http");
        writer.line("Content-Transfer-Encoding: binary");

        if in_change_set {
            let id = match request.header("Content-ID") {
                Some(explicit) => explicit.to_string(),
                None => {
                    content_id += 1;
                    content_id.to_string()
                }
            };
            writer.line(&format!("Content-ID: {}", id));
        }

        writer.line("");
        writer.line(&format!(
            "{} {} HTTP/1.1",
            request.method,
            part_url(&request.path, data_api_url)
        ));

        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("Authorization")
                || name.eq_ignore_ascii_case("Content-ID")
            {
                continue;
            }
            if request.method == Method::Get && name.eq_ignore_ascii_case("Content-Type") {
                continue;
            }
            writer.line(&format!("{}: {}", name, value));
        }

        writer.line("");
        match &request.body {
            Some(RequestBody::Text(text)) => writer.line(text),
            Some(RequestBody::Binary(bytes)) => {
                writer.bytes(bytes);
                writer.line("");
            }
            None => {}
        }
    }

    if let Some(open) = changeset {
        writer.line(&format!("--{}--", open));
    }
    writer.line(&format!("--{}--", batch_boundary));

    debug!(
        "Serialized batch {} with {} request(s), {} bytes",
        batch_boundary,
        requests.len(),
        writer.buffer.len()
    );

    let mut headers = BTreeMap::new();
    headers.insert(
        "Content-Type".to_string(),
        format!("multipart/mixed;boundary={}", batch_boundary),
    );

    BatchEnvelope {
        boundary: batch_boundary,
        headers,
        body: writer.buffer,
    }
}

/// Content-ID references (`$1/...`) and absolute URLs are written as given
fn part_url(path: &str, data_api_url: &str) -> String {
    if path.starts_with('$') || path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}{}", data_api_url, path)
    }
}

#[derive(Default)]
struct PartWriter {
    buffer: Vec<u8>,
}

impl PartWriter {
    fn line(&mut self, text: &str) {
        self.buffer.extend_from_slice(text.as_bytes());
        self.buffer.extend_from_slice(CRLF.as_bytes());
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const URL: &str = "https://org.crm.dynamics.com/api/data/v9.2/";

    fn request(method: Method, path: &str, body: Option<&str>) -> ComposedRequest {
        let mut headers = BTreeMap::new();
        headers.insert("Accept".to_string(), "application/json".to_string());
        headers.insert(
            "Content-Type".to_string(),
            "application/json; charset=utf-8".to_string(),
        );
        headers.insert("Authorization".to_string(), "Bearer secret".to_string());
        ComposedRequest {
            method,
            path: path.to_string(),
            headers,
            body: body.map(|b| RequestBody::Text(b.to_string())),
            is_async: true,
            timeout: Some(Duration::from_secs(5)),
            in_change_set: true,
        }
    }

    fn fixed_ids() -> impl FnMut() -> Uuid {
        let mut next = 0u128;
        move || {
            next += 1;
            Uuid::from_u128(next)
        }
    }

    fn top_level_parts(body: &str, boundary: &str) -> Vec<String> {
        body.split(&format!("--{}", boundary))
            .skip(1)
            .filter(|part| !part.starts_with("--"))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_changeset_grouping() {
        let requests = vec![
            request(Method::Get, "accounts?$select=name", None),
            request(Method::Post, "accounts", Some("{\"name\":\"a\"}")),
            request(Method::Post, "accounts", Some("{\"name\":\"b\"}")),
            request(Method::Get, "contacts", None),
            request(Method::Patch, "accounts(1)", Some("{\"name\":\"c\"}")),
        ];

        let envelope = convert_to_batch_with(&requests, URL, fixed_ids());
        let body = envelope.body_text();
        let parts = top_level_parts(&body, &envelope.boundary);

        assert_eq!(parts.len(), 4);
        assert!(
            parts[0]
                .contains("GET https://org.crm.dynamics.com/api/data/v9.2/accounts?$select=name HTTP/1.1")
        );
        assert!(parts[1].contains("Content-Type: multipart/mixed;boundary=changeset_"));
        assert_eq!(parts[1].matches("POST ").count(), 2);
        assert!(
            parts[2]
                .contains("GET https://org.crm.dynamics.com/api/data/v9.2/contacts HTTP/1.1")
        );
        assert!(!parts[2].contains("changeset_"));
        assert!(
            parts[3]
                .contains("PATCH https://org.crm.dynamics.com/api/data/v9.2/accounts(1) HTTP/1.1")
        );

        assert_eq!(
            envelope.headers["Content-Type"],
            format!("multipart/mixed;boundary={}", envelope.boundary)
        );
        assert!(body.ends_with(&format!("--{}--\r\n", envelope.boundary)));
    }

    #[test]
    fn test_content_ids_and_reset() {
        let requests = vec![
            request(Method::Post, "accounts", Some("{}")),
            request(Method::Post, "contacts", Some("{}")),
            request(Method::Get, "accounts", None),
            request(Method::Post, "leads", Some("{}")),
        ];

        let body = convert_to_batch_with(&requests, URL, fixed_ids()).body_text();
        assert_eq!(body.matches("Content-ID: 100001").count(), 2);
        assert_eq!(body.matches("Content-ID: 100002").count(), 1);
    }

    #[test]
    fn test_explicit_content_id_and_reference_path() {
        let mut first = request(Method::Post, "accounts", Some("{}"));
        first.headers.insert("Content-ID".into(), "1".into());
        let second = request(
            Method::Post,
            "$1/contact_customer_accounts",
            Some("{\"lastname\":\"x\"}"),
        );

        let body = convert_to_batch_with(&[first, second], URL, fixed_ids()).body_text();
        assert!(body.contains("Content-ID: 1\r\n"));
        assert!(body.contains("Content-ID: 100001\r\n"));
        assert!(body.contains("POST $1/contact_customer_accounts HTTP/1.1"));
    }

    #[test]
    fn test_authorization_and_get_content_type_are_not_copied() {
        let requests = vec![
            request(Method::Get, "accounts", None),
            request(Method::Delete, "accounts(1)", None),
        ];
        let body = convert_to_batch_with(&requests, URL, fixed_ids()).body_text();

        assert!(!body.contains("Authorization"));
        let get_part = body.split("DELETE").next().unwrap_or_default();
        assert!(!get_part.contains("application/json; charset=utf-8"));
    }

    #[test]
    fn test_opt_out_of_changeset() {
        let mut standalone = request(Method::Post, "WinOpportunity", Some("{}"));
        standalone.in_change_set = false;
        let requests = vec![request(Method::Post, "accounts", Some("{}")), standalone];

        let envelope = convert_to_batch_with(&requests, URL, fixed_ids());
        let body = envelope.body_text();
        let parts = top_level_parts(&body, &envelope.boundary);

        assert_eq!(parts.len(), 2);
        assert!(
            parts[1]
                .contains("POST https://org.crm.dynamics.com/api/data/v9.2/WinOpportunity HTTP/1.1")
        );
        assert!(!parts[1].contains("Content-ID"));
    }

    #[test]
    fn test_binary_body_is_unmodified() {
        let mut upload = request(Method::Patch, "annotations(1)/documentbody", None);
        upload.body = Some(RequestBody::Binary(vec![0xff, 0x00, 0x7f]));
        let envelope = convert_to_batch_with(&[upload], URL, fixed_ids());

        assert!(
            envelope
                .body
                .windows(3)
                .any(|window| window == [0xff, 0x00, 0x7f])
        );
    }
}
