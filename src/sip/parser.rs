// SIP message parser using nom combinators

use nom::{
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{multispace0, space1},
    combinator::{eof, opt, rest},
    sequence::preceded,
    IResult,
};

use super::message::{Headers, Method, SipMessage, SipRequest, SipResponse};

const PROTOCOL_PREFIX: &str = "SIP/";

/// Parse failures. `Incomplete` is the only one that means "need more bytes";
/// every other variant means the input is malformed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid start line: {0:?}")]
    MalformedStartLine(String),
    #[error("invalid header: {0:?}")]
    InvalidHeader(String),
    #[error("unknown method: {0:?}")]
    UnknownMethod(String),
    #[error("invalid status code: {0:?}")]
    InvalidStatus(String),
    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),
    #[error("short body (missing {missing} bytes)")]
    Incomplete { missing: usize },
}

impl ParseError {
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete { .. })
    }
}

/// nom parser: one line up to LF, tolerating a missing terminator at end of input.
/// Template files usually carry bare LF endings, so CR is trimmed by the caller.
fn line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    let (input, line) = take_till(|b: u8| b == b'\n')(input)?;
    let (input, _) = opt(tag("\n"))(input)?;
    Ok((input, line))
}

/// Split off the next line as trimmed text.
fn next_line(input: &[u8]) -> (String, &[u8]) {
    match line(input) {
        Ok((remaining, raw)) => (String::from_utf8_lossy(raw).trim().to_string(), remaining),
        Err(_) => (String::new(), &input[input.len()..]),
    }
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace())(input)
}

/// Request line: METHOD SP Request-URI SP SIP-Version
fn request_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, method) = token(input)?;
    let (input, _) = space1(input)?;
    let (input, uri) = token(input)?;
    let (input, _) = space1(input)?;
    let (input, version) = token(input)?;
    let (input, _) = eof(input)?;
    Ok((input, (method, uri, version)))
}

/// Status line: SIP-Version SP Status-Code [SP Reason-Phrase]
fn status_line(input: &str) -> IResult<&str, (&str, &str, &str)> {
    let (input, version) = token(input)?;
    let (input, _) = space1(input)?;
    let (input, status) = token(input)?;
    let (input, reason) = opt(preceded(space1, rest))(input)?;
    Ok((input, (version, status, reason.unwrap_or(""))))
}

/// Header line: `name:` followed by optional whitespace and the value.
fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, name) = token(input)?;
    let (input, _) = multispace0(input)?;
    let (input, value) = rest(input)?;
    Ok((input, (name, value)))
}

fn strip_protocol<'a>(version: &'a str, start_line: &str) -> Result<&'a str, ParseError> {
    version
        .strip_prefix(PROTOCOL_PREFIX)
        .ok_or_else(|| ParseError::MalformedStartLine(start_line.to_string()))
}

/// Read header lines until a blank line (or end of input).
///
/// Keys are stored lower-cased. Returns the headers and the bytes that follow
/// the blank separator line.
pub fn parse_headers(mut input: &[u8]) -> Result<(Headers, &[u8]), ParseError> {
    let mut headers = Headers::new();
    loop {
        let (text, remaining) = next_line(input);
        input = remaining;
        if text.is_empty() {
            return Ok((headers, input));
        }
        let (_, (name, value)) =
            header_line(&text).map_err(|_| ParseError::InvalidHeader(text.clone()))?;
        let name = name
            .strip_suffix(':')
            .ok_or_else(|| ParseError::InvalidHeader(text.clone()))?;
        headers.set(name, value);
    }
}

/// Frame the body that follows the headers.
///
/// With a Content-Length the body is exactly that many bytes and the rest is
/// returned as trailing data; with only a Content-Type the body takes
/// everything; with neither the body is empty.
pub fn parse_body<'a>(input: &'a [u8], headers: &Headers) -> Result<(Vec<u8>, &'a [u8]), ParseError> {
    if let Some(raw) = headers.get("content-length").or_else(|| headers.get("l")) {
        let n: usize = raw
            .trim()
            .parse()
            .map_err(|_| ParseError::InvalidContentLength(raw.to_string()))?;
        if input.len() < n {
            return Err(ParseError::Incomplete {
                missing: n - input.len(),
            });
        }
        let (body, trailing) = input.split_at(n);
        Ok((body.to_vec(), trailing))
    } else if headers.contains("content-type") || headers.contains("c") {
        Ok((input.to_vec(), &input[input.len()..]))
    } else {
        Ok((Vec::new(), input))
    }
}

/// Parse a SIP request from raw bytes.
pub fn parse_request(input: &[u8]) -> Result<SipRequest, ParseError> {
    let (start, remaining) = next_line(input);
    let (_, (method, uri, version)) =
        request_line(&start).map_err(|_| ParseError::MalformedStartLine(start.clone()))?;
    let version = strip_protocol(version, &start)?;
    let method: Method = method.parse()?;

    let (headers, remaining) = parse_headers(remaining)?;
    let (body, trailing) = parse_body(remaining, &headers)?;

    Ok(SipRequest {
        method,
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
        body,
        trailing: trailing.to_vec(),
    })
}

/// Parse a SIP response from raw bytes.
pub fn parse_response(input: &[u8]) -> Result<SipResponse, ParseError> {
    let (start, remaining) = next_line(input);
    let (_, (version, status, reason)) =
        status_line(&start).map_err(|_| ParseError::MalformedStartLine(start.clone()))?;
    let version = strip_protocol(version, &start)?;
    if !status.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ParseError::InvalidStatus(status.to_string()));
    }

    let (headers, remaining) = parse_headers(remaining)?;
    let (body, trailing) = parse_body(remaining, &headers)?;

    Ok(SipResponse {
        version: version.to_string(),
        status: status.to_string(),
        reason: reason.to_string(),
        headers,
        body,
        trailing: trailing.to_vec(),
    })
}

/// Parse an inbound datagram, trying a response first and a request second.
///
/// The request parse is only attempted when the start line is not a status
/// line; a response that fails later (bad header, short body) keeps its error.
pub fn parse_sip_message(input: &[u8]) -> Result<SipMessage, ParseError> {
    match parse_response(input) {
        Ok(resp) => Ok(SipMessage::Response(resp)),
        Err(ParseError::MalformedStartLine(_) | ParseError::InvalidStatus(_)) => {
            parse_request(input).map(SipMessage::Request)
        }
        Err(e) => Err(e),
    }
}
