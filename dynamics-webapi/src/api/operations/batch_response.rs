//! `$batch` response parser
//!
//! Splits a `multipart/mixed` response into one [`ResponseEnvelope`] per
//! embedded HTTP response, descending into changeset responses.

use log::trace;

use crate::api::http::{ResponseBody, ResponseEnvelope};
use crate::error::{Error, Result};

/// Parse a batch response body. `content_type` is the outer `Content-Type`
/// header; when it has no boundary the first delimiter line of the body is used.
pub fn parse_batch_response(
    body: &str,
    content_type: Option<&str>,
) -> Result<Vec<ResponseEnvelope>> {
    let body = body.replace("\r\n", "\n");
    let boundary = content_type
        .and_then(boundary_parameter)
        .or_else(|| first_delimiter(&body))
        .ok_or_else(|| Error::Batch("batch response has no multipart boundary".to_string()))?;

    let mut responses = Vec::new();
    parse_multipart(&body, &boundary, &mut responses)?;
    trace!("Parsed {} response part(s) from batch {}", responses.len(), boundary);
    Ok(responses)
}

fn boundary_parameter(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .map(str::trim)
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
}

fn first_delimiter(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find(|line| line.starts_with("--") && line.len() > 2)
        .map(|line| line[2..].to_string())
}

fn parse_multipart(
    body: &str,
    boundary: &str,
    responses: &mut Vec<ResponseEnvelope>,
) -> Result<()> {
    let delimiter = format!("--{}", boundary);

    for part in body.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break;
        }

        let part = part.trim_start_matches('\n');
        let (part_headers, content) = split_head(part);

        let part_type = header_value(part_headers, "Content-Type").unwrap_or_default();
        if part_type.starts_with("multipart/mixed") {
            let inner = boundary_parameter(part_type).ok_or_else(|| {
                Error::Batch("changeset response part has no boundary".to_string())
            })?;
            parse_multipart(content, &inner, responses)?;
        } else {
            responses.push(parse_http_response(content)?);
        }
    }

    Ok(())
}

/// Split at the first blank line into (header block, remainder)
fn split_head(text: &str) -> (&str, &str) {
    match text.find("\n\n") {
        Some(index) => (&text[..index], &text[index + 2..]),
        None => (text, ""),
    }
}

fn header_value<'a>(block: &'a str, name: &str) -> Option<&'a str> {
    block.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
    })
}

fn parse_http_response(text: &str) -> Result<ResponseEnvelope> {
    let text = text.trim_start_matches('\n');
    let (head, body) = split_head(text);
    let mut lines = head.lines();

    let status_line = lines
        .next()
        .ok_or_else(|| Error::Batch("empty response part".to_string()))?;
    let status = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| Error::Batch(format!("invalid status line: {}", status_line)))?;

    let mut envelope = ResponseEnvelope::new(status);
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            envelope
                .headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
    }
    envelope.data = ResponseBody::from_text(body.trim().to_string());

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const RESPONSE: &str = "--batchresponse_aa\r\n\
Content-Type: multipart/mixed; boundary=changesetresponse_bb\r\n\
\r\n\
--changesetresponse_bb\r\n\
Content-Type: application/http\r\n\
Content-Transfer-Encoding: binary\r\n\
Content-ID: 100001\r\n\
\r\n\
HTTP/1.1 204 No Content\r\n\
OData-Version: 4.0\r\n\
OData-EntityId: https://org.crm.dynamics.com/api/data/v9.2/accounts(8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b)\r\n\
\r\n\
\r\n\
--changesetresponse_bb--\r\n\
--batchresponse_aa\r\n\
Content-Type: application/http\r\n\
Content-Transfer-Encoding: binary\r\n\
\r\n\
HTTP/1.1 200 OK\r\n\
Content-Type: application/json; odata.metadata=minimal\r\n\
OData-Version: 4.0\r\n\
\r\n\
{\"@odata.context\":\"x\",\"value\":[{\"name\":\"Contoso\"}]}\r\n\
--batchresponse_aa--\r\n";

    #[test]
    fn test_parse_nested_changeset() {
        let responses =
            parse_batch_response(RESPONSE, Some("multipart/mixed; boundary=batchresponse_aa"))
                .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].status, 204);
        assert!(
            responses[0]
                .header("odata-entityid")
                .unwrap()
                .ends_with("accounts(8f2b6c1e-3a4d-4e5f-9a0b-1c2d3e4f5a6b)")
        );
        assert_eq!(responses[0].data, ResponseBody::Empty);

        assert_eq!(responses[1].status, 200);
        assert_eq!(
            responses[1].json(),
            Some(&json!({"@odata.context": "x", "value": [{"name": "Contoso"}]}))
        );
    }

    #[test]
    fn test_boundary_from_body() {
        let responses = parse_batch_response(RESPONSE, None).unwrap();
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn test_error_part() {
        let body = "--batchresponse_cc\n\
Content-Type: application/http\n\
\n\
HTTP/1.1 412 Precondition Failed\n\
Content-Type: application/json\n\
\n\
{\"error\":{\"code\":\"0x80060882\",\"message\":\"The version of the existing record doesn't match\"}}\n\
--batchresponse_cc--\n";

        let responses = parse_batch_response(body, None).unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].status, 412);
        assert_eq!(responses[0].json().unwrap()["error"]["code"], "0x80060882");
    }

    #[test]
    fn test_rejects_bodies_without_boundary() {
        assert!(parse_batch_response("not multipart", None).is_err());
    }
}
