use crate::sip::parser::ParseError;
use crate::template::TemplateError;

#[derive(Debug, thiserror::Error)]
pub enum SipPingError {
    #[error("malformed SIP Request: {0}")]
    MalformedRequest(ParseError),
    #[error("template error: {0}")]
    TemplateError(#[from] TemplateError),
    #[error("cannot read template file {path}: {reason}")]
    TemplateFile { path: String, reason: String },
    #[error("Network error: {0}")]
    NetworkError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}
