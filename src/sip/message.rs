// SIP message data model

use std::fmt;
use std::str::FromStr;

use super::parser::ParseError;

/// SIP request methods accepted by the probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Ack,
    Bye,
    Cancel,
    Info,
    Invite,
    Message,
    Notify,
    Options,
    Prack,
    Publish,
    Refer,
    Register,
    Subscribe,
    Update,
}

impl Method {
    pub const ALL: [Method; 14] = [
        Method::Ack,
        Method::Bye,
        Method::Cancel,
        Method::Info,
        Method::Invite,
        Method::Message,
        Method::Notify,
        Method::Options,
        Method::Prack,
        Method::Publish,
        Method::Refer,
        Method::Register,
        Method::Subscribe,
        Method::Update,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Info => "INFO",
            Method::Invite => "INVITE",
            Method::Message => "MESSAGE",
            Method::Notify => "NOTIFY",
            Method::Options => "OPTIONS",
            Method::Prack => "PRACK",
            Method::Publish => "PUBLISH",
            Method::Refer => "REFER",
            Method::Register => "REGISTER",
            Method::Subscribe => "SUBSCRIBE",
            Method::Update => "UPDATE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ParseError;

    /// Method tokens are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParseError::UnknownMethod(s.to_string()))
    }
}

/// Long header names paired with their compact single-letter forms.
const COMPACT_FORMS: [(&str, &str); 12] = [
    ("allow-events", "u"),
    ("call-id", "i"),
    ("contact", "m"),
    ("content-encoding", "e"),
    ("content-length", "l"),
    ("content-type", "c"),
    ("event", "o"),
    ("from", "f"),
    ("subject", "s"),
    ("supported", "k"),
    ("to", "t"),
    ("via", "v"),
];

/// Header names whose display form does not follow the dash-capitalize rule.
const CANONICAL_EXCEPTIONS: [(&str, &str); 3] = [
    ("call-id", "Call-ID"),
    ("cseq", "CSeq"),
    ("www-authenticate", "WWW-Authenticate"),
];

/// Return the canonical display form of a header name.
///
/// Compact forms are expanded first (`i` becomes `Call-ID`), then a small
/// exception table is consulted, and everything else gets each dash-separated
/// segment capitalized (`content-length` becomes `Content-Length`).
pub fn canonical_header_name(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    let long = COMPACT_FORMS
        .iter()
        .find(|(_, compact)| *compact == lower)
        .map(|(long, _)| *long)
        .unwrap_or(lower.as_str());

    if let Some((_, canonical)) = CANONICAL_EXCEPTIONS.iter().find(|(key, _)| *key == long) {
        return canonical.to_string();
    }

    long.split('-').map(capitalize).collect::<Vec<_>>().join("-")
}

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => std::iter::once(first.to_ascii_uppercase()).chain(chars).collect(),
        None => String::new(),
    }
}

/// A single SIP header. The name is stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Header mapping keyed by lower-cased name.
///
/// Keys are unique: setting an existing name replaces its value in place, so
/// insertion order survives for display but the last write wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    /// Create an empty Headers collection
    pub fn new() -> Self {
        Headers { entries: Vec::new() }
    }

    /// Get a header value by name (case-insensitive)
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Set a header value, replacing any previous value for the same name.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(name))
        {
            Some(existing) => existing.value = value,
            None => self.entries.push(Header {
                name: name.to_ascii_lowercase(),
                value,
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all header entries in insertion order
    pub fn entries(&self) -> &[Header] {
        &self.entries
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name.as_ref(), value);
        }
        headers
    }
}

/// Headers every freshly built message starts with.
fn default_headers() -> Headers {
    ["to", "from", "call-id", "cseq", "contact"]
        .into_iter()
        .map(|name| (name, ""))
        .collect()
}

/// Fields of an outgoing request. `Default` gives an INVITE to
/// `sip:user@example.com` with empty dialog headers.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            method: Method::Invite,
            uri: "sip:user@example.com".to_string(),
            version: "2.0".to_string(),
            headers: default_headers(),
            body: Vec::new(),
        }
    }
}

/// Fields of a response. `Default` gives `SIP/2.0 200 OK`.
#[derive(Debug, Clone)]
pub struct ResponseConfig {
    pub version: String,
    pub status: String,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            version: "2.0".to_string(),
            status: "200".to_string(),
            reason: "OK".to_string(),
            headers: default_headers(),
            body: Vec::new(),
        }
    }
}

/// A SIP request. `version` excludes the `SIP/` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct SipRequest {
    pub method: Method,
    pub uri: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Bytes after a framed body; kept verbatim, never reparsed.
    pub trailing: Vec<u8>,
}

impl SipRequest {
    pub fn new(config: RequestConfig) -> Self {
        Self {
            method: config.method,
            uri: config.uri,
            version: config.version,
            headers: config.headers,
            body: config.body,
            trailing: Vec::new(),
        }
    }

    /// Sequence number part of the CSeq header, if any.
    pub fn cseq_number(&self) -> Option<&str> {
        self.headers
            .get("cseq")
            .and_then(|v| v.split_whitespace().next())
    }
}

/// A SIP response. `status` holds the all-digit status token.
#[derive(Debug, Clone, PartialEq)]
pub struct SipResponse {
    pub version: String,
    pub status: String,
    pub reason: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub trailing: Vec<u8>,
}

impl SipResponse {
    pub fn new(config: ResponseConfig) -> Self {
        Self {
            version: config.version,
            status: config.status,
            reason: config.reason,
            headers: config.headers,
            body: config.body,
            trailing: Vec::new(),
        }
    }

    /// Numeric status code, `None` when it does not fit in a u16.
    pub fn status_code(&self) -> Option<u16> {
        self.status.parse().ok()
    }
}

/// A SIP message (request or response)
#[derive(Debug, Clone, PartialEq)]
pub enum SipMessage {
    Request(SipRequest),
    Response(SipResponse),
}

impl SipMessage {
    pub fn headers(&self) -> &Headers {
        match self {
            SipMessage::Request(req) => &req.headers,
            SipMessage::Response(resp) => &resp.headers,
        }
    }

    pub fn body(&self) -> &[u8] {
        match self {
            SipMessage::Request(req) => &req.body,
            SipMessage::Response(resp) => &resp.body,
        }
    }
}
