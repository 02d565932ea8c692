// SIP message formatter
// Converts SipMessage structs into wire bytes

use std::fmt;

use super::message::{canonical_header_name, Headers, SipMessage, SipRequest, SipResponse};

/// Estimate the output size of a formatted SIP message to pre-allocate buffer.
pub fn estimate_message_size(msg: &SipMessage) -> usize {
    let start_line = match msg {
        // METHOD SP URI SP SIP/VERSION CRLF
        SipMessage::Request(req) => {
            req.method.as_str().len() + 1 + req.uri.len() + 5 + req.version.len() + 2
        }
        // SIP/VERSION SP STATUS SP REASON CRLF
        SipMessage::Response(resp) => {
            4 + resp.version.len() + 1 + resp.status.len() + 1 + resp.reason.len() + 2
        }
    };
    let headers: usize = msg
        .headers()
        .entries()
        .iter()
        // "Name: Value\r\n"; a compact name expands to at most 16 bytes
        .map(|h| h.name.len() + 16 + h.value.len() + 4)
        .sum();
    start_line + headers + 2 + msg.body().len()
}

fn write_headers(buf: &mut Vec<u8>, headers: &Headers) {
    for header in headers.entries() {
        buf.extend_from_slice(canonical_header_name(&header.name).as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(header.value.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
}

/// Format a SIP message into an existing buffer.
/// The buffer is NOT cleared.
pub fn format_into(buf: &mut Vec<u8>, msg: &SipMessage) {
    match msg {
        SipMessage::Request(req) => {
            buf.extend_from_slice(req.method.as_str().as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(req.uri.as_bytes());
            buf.extend_from_slice(b" SIP/");
            buf.extend_from_slice(req.version.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        SipMessage::Response(resp) => {
            buf.extend_from_slice(b"SIP/");
            buf.extend_from_slice(resp.version.as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(resp.status.as_bytes());
            if !resp.reason.is_empty() {
                buf.push(b' ');
                buf.extend_from_slice(resp.reason.as_bytes());
            }
            buf.extend_from_slice(b"\r\n");
        }
    }
    write_headers(buf, msg.headers());
    buf.extend_from_slice(b"\r\n");
    buf.extend_from_slice(msg.body());
}

/// Format a SipMessage into wire bytes.
///
///   start-line\r\n
///   Canonical-Name: value\r\n
///   ...
///   \r\n
///   [body]
///
/// Trailing data captured while parsing is not emitted.
pub fn format_sip_message(msg: &SipMessage) -> Vec<u8> {
    let mut buf = Vec::with_capacity(estimate_message_size(msg));
    format_into(&mut buf, msg);
    buf
}

pub fn format_request(req: &SipRequest) -> Vec<u8> {
    format_sip_message(&SipMessage::Request(req.clone()))
}

pub fn format_response(resp: &SipResponse) -> Vec<u8> {
    format_sip_message(&SipMessage::Response(resp.clone()))
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&format_sip_message(self)))
    }
}
