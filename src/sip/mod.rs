pub mod formatter;
pub mod message;
pub mod parser;

pub use message::{canonical_header_name, Headers, Method, SipMessage, SipRequest, SipResponse};
pub use parser::{parse_request, parse_response, parse_sip_message, ParseError};
