// Request generator: renders the template once per iteration

use std::path::Path;

use crate::error::SipPingError;
use crate::sip::formatter::format_request;
use crate::sip::message::Method;
use crate::sip::parser::parse_request;
use crate::template::{resolve_computed, substitute, FunctionTable, Variables};

/// OPTIONS request used when no template file is given.
pub const DEFAULT_REQUEST_TEMPLATE: &str = "OPTIONS sip:%(dest_ip)s:%(dest_port)s SIP/2.0
Via: SIP/2.0/UDP %(source_ip)s:%(source_port)s
Max-Forwards: 70
From: \"fake\" <sip:fake@%(source_ip)s>
To: <sip:%(dest_ip)s:%(dest_port)s>
Contact: <sip:fake@%(source_ip)s:%(source_port)s>
Call-ID: fake-id@%(source_ip)s
User-Agent: SIPPing
Date: Wed, 24 Apr 2013 20:35:23 GMT
Allow: INVITE, ACK, CANCEL, OPTIONS, BYE, REFER, SUBSCRIBE, NOTIFY, INFO, PUBLISH
Supported: replaces, timer";

/// Read a template file in full, or fall back to the built-in OPTIONS template.
pub fn load_template(path: Option<&Path>) -> Result<String, SipPingError> {
    match path {
        None => Ok(DEFAULT_REQUEST_TEMPLATE.to_string()),
        Some(path) => std::fs::read_to_string(path).map_err(|e| SipPingError::TemplateFile {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}

/// One ready-to-send request.
#[derive(Debug, Clone)]
pub struct GeneratedRequest {
    /// Zero-based generation index.
    pub seq: u64,
    pub method: Method,
    pub cseq: String,
    /// Variable set this request was rendered with, computed values included.
    pub variables: Variables,
    pub bytes: Vec<u8>,
}

impl GeneratedRequest {
    /// Sequence number part of the CSeq header.
    pub fn cseq_number(&self) -> &str {
        self.cseq.split_whitespace().next().unwrap_or("")
    }
}

/// Lazy, finite sequence of serialized requests.
///
/// Each step binds `seq`, resolves computed variables, renders the template,
/// parses the result as a request and fills in CSeq and Content-Length when
/// the template leaves them out. Any failure ends the sequence after being
/// yielded once: a template that does not render or parse is broken for every
/// iteration.
pub struct RequestGenerator {
    template: String,
    variables: Variables,
    functions: FunctionTable,
    next: u64,
    count: u64,
}

impl RequestGenerator {
    pub fn new(template: String, variables: Variables, functions: FunctionTable, count: u64) -> Self {
        Self {
            template,
            variables,
            functions,
            next: 0,
            count,
        }
    }

    fn generate(&self, seq: u64) -> Result<GeneratedRequest, SipPingError> {
        let mut itoa_buf = itoa::Buffer::new();
        let snapshot = self.variables.with("seq", itoa_buf.format(seq));
        let working = resolve_computed(&snapshot, &self.functions)?;
        let text = substitute(&self.template, &working)?;

        let mut request = parse_request(text.as_bytes()).map_err(SipPingError::MalformedRequest)?;
        if !request.headers.contains("cseq") {
            request
                .headers
                .set("cseq", format!("{} {}", seq, request.method));
        }
        if !request.headers.contains("content-length") && !request.headers.contains("l") {
            request
                .headers
                .set("content-length", itoa_buf.format(request.body.len()));
        }

        Ok(GeneratedRequest {
            seq,
            method: request.method,
            cseq: request.headers.get("cseq").unwrap_or_default().to_string(),
            variables: working,
            bytes: format_request(&request),
        })
    }
}

impl Iterator for RequestGenerator {
    type Item = Result<GeneratedRequest, SipPingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.count {
            return None;
        }
        let seq = self.next;
        let item = self.generate(seq);
        self.next = if item.is_ok() { seq + 1 } else { self.count };
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.count - self.next).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}
