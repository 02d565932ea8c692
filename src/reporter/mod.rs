// Reporter module - reply lines and the JSON run summary
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;

use crate::error::SipPingError;
use crate::sip::message::SipMessage;
use crate::stats::StatsSnapshot;
use crate::template::{substitute, TemplateError, Variables};

/// Matches the whole serialized message exactly once.
pub const DEFAULT_OUT_REGEX: &str = r"(?s)\A.*\z";

pub const DEFAULT_RESPONSE_LINE: &str =
    "received Response %(status)s %(reason)s from %(sock_src_ip)s:%(sock_src_port)s cseq=%(seq)s";

pub const DEFAULT_REQUEST_LINE: &str =
    "received Request %(method)s %(uri)s from %(sock_src_ip)s:%(sock_src_port)s cseq=%(seq)s";

/// Everything needed to explain a reply line that could not be rendered.
#[derive(Debug, Clone)]
pub struct ReportFailure {
    pub error: TemplateError,
    pub regex: String,
    pub replacement: String,
    pub substituted: String,
    pub variables: Variables,
    pub message: String,
}

impl fmt::Display for ReportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: an issue occurred applying regex substitution:")?;
        writeln!(f, "\t-----------------------------------")?;
        writeln!(f, "\t{}", self.error)?;
        writeln!(f, "\t-----------------------------------")?;
        writeln!(f, "\tTemplate vars:")?;
        for (k, v) in self.variables.iter() {
            writeln!(f, "\t\t{}:'{}'", k, v)?;
        }
        writeln!(f, "\tRegex: '{}'", self.regex)?;
        writeln!(f, "\tSubstitution string: '{}'", self.replacement)?;
        writeln!(f, "\tSubstitution text: '{}'", self.substituted)?;
        writeln!(f, "\tMessage:")?;
        writeln!(f, "\t-----------------------------------")?;
        for line in self.message.lines() {
            writeln!(f, "\t{}", line)?;
        }
        write!(f, "\t-----------------------------------")
    }
}

/// Turns inbound messages into human-readable report lines.
///
/// A user regex and replacement may override the defaults independently;
/// whichever is missing falls back to the per-variant default.
pub struct ReplyReporter {
    out_regex: Option<Regex>,
    out_replace: Option<String>,
    default_regex: Regex,
    verbose: bool,
}

impl ReplyReporter {
    /// An invalid regex is rejected here, before any packet is sent.
    pub fn new(
        out_regex: Option<&str>,
        out_replace: Option<&str>,
        verbose: bool,
    ) -> Result<Self, SipPingError> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                SipPingError::ConfigError(format!("invalid output regex '{}': {}", pattern, e))
            })
        };
        Ok(Self {
            out_regex: out_regex.filter(|r| !r.is_empty()).map(compile).transpose()?,
            out_replace: out_replace.filter(|r| !r.is_empty()).map(str::to_string),
            default_regex: compile(DEFAULT_OUT_REGEX)?,
            verbose,
        })
    }

    fn regex(&self) -> &Regex {
        self.out_regex.as_ref().unwrap_or(&self.default_regex)
    }

    fn replacement(&self, msg: &SipMessage) -> &str {
        match (&self.out_replace, msg) {
            (Some(custom), _) => custom,
            (None, SipMessage::Response(_)) => DEFAULT_RESPONSE_LINE,
            (None, SipMessage::Request(_)) => DEFAULT_REQUEST_LINE,
        }
    }

    /// Render the report line for `msg` received from `from`.
    pub fn render(
        &self,
        msg: &SipMessage,
        from: SocketAddr,
        vars: &Variables,
    ) -> Result<String, ReportFailure> {
        let working = bind_report_fields(msg, from, vars);
        let text = msg.to_string();
        let regex = self.regex();
        let replacement = self.replacement(msg);
        let substituted = regex.replace_all(&text, replacement).into_owned();

        substitute(&substituted, &working).map_err(|error| ReportFailure {
            error,
            regex: regex.as_str().to_string(),
            replacement: replacement.to_string(),
            substituted,
            variables: working.clone(),
            message: text.clone(),
        })
    }

    /// Print the report line on stdout, or the diagnostic on stderr.
    /// Returns whether a line was printed.
    pub fn emit(&self, msg: &SipMessage, from: SocketAddr, vars: &Variables) -> bool {
        if self.verbose {
            eprintln!("\n=== Full reply received ===\n\n{}", msg);
        }
        match self.render(msg, from, vars) {
            Ok(line) => {
                println!("{}", line);
                true
            }
            Err(failure) => {
                eprintln!("{}", failure);
                false
            }
        }
    }
}

/// Copy of `vars` with the fields of `msg` and the sender address bound.
pub fn bind_report_fields(msg: &SipMessage, from: SocketAddr, vars: &Variables) -> Variables {
    let mut working = vars.clone();
    match msg {
        SipMessage::Response(resp) => {
            working.set("status", resp.status.as_str());
            working.set("reason", resp.reason.as_str());
        }
        SipMessage::Request(req) => {
            working.set("method", req.method.as_str());
            working.set("uri", req.uri.as_str());
        }
    }
    working.set("sock_src_ip", from.ip().to_string());
    working.set("sock_src_port", from.port().to_string());
    working
}

/// Machine-readable outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub sent: u64,
    pub received: u64,
    pub send_failures: u64,
    pub timeouts: u64,
    pub unparsable_replies: u64,
    pub loss_percent: Option<f64>,
    pub status_codes: BTreeMap<u16, u64>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn from_snapshot(snapshot: &StatsSnapshot, interrupted: bool) -> Self {
        Self {
            sent: snapshot.sent,
            received: snapshot.received,
            send_failures: snapshot.send_failures,
            timeouts: snapshot.timeouts,
            unparsable_replies: snapshot.unparsable,
            loss_percent: snapshot.loss_percent(),
            status_codes: snapshot.status_codes.iter().map(|(k, v)| (*k, *v)).collect(),
            interrupted,
        }
    }
}

/// JSON結果をファイルに書き出す
pub fn write_json_summary(summary: &RunSummary, path: &Path) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sip::message::{Headers, Method, RequestConfig, ResponseConfig, SipRequest, SipResponse};
    use crate::sip::parser::parse_sip_message;
    use std::collections::HashMap;
    use tempfile::NamedTempFile;

    fn from() -> SocketAddr {
        "192.0.2.7:5060".parse().unwrap()
    }

    fn vars(seq: &str) -> Variables {
        [("seq", seq), ("dest_ip", "192.0.2.7")].into_iter().collect()
    }

    fn ok_200() -> SipMessage {
        parse_sip_message(
            b"SIP/2.0 200 OK\r\nCall-ID: fake-id@10.0.0.1\r\nCSeq: 3 OPTIONS\r\nContent-Length: 0\r\n\r\n",
        )
        .unwrap()
    }

    #[test]
    fn test_default_response_line() {
        let reporter = ReplyReporter::new(None, None, false).unwrap();
        let line = reporter.render(&ok_200(), from(), &vars("3")).unwrap();
        assert_eq!(line, "received Response 200 OK from 192.0.2.7:5060 cseq=3");
    }

    #[test]
    fn test_default_request_line() {
        let reporter = ReplyReporter::new(None, None, false).unwrap();
        let msg = SipMessage::Request(SipRequest::new(RequestConfig {
            method: Method::Notify,
            uri: "sip:me@10.0.0.1".to_string(),
            ..Default::default()
        }));
        let line = reporter.render(&msg, from(), &vars("0")).unwrap();
        assert_eq!(line, "received Request NOTIFY sip:me@10.0.0.1 from 192.0.2.7:5060 cseq=0");
    }

    #[test]
    fn test_empty_overrides_mean_defaults() {
        let reporter = ReplyReporter::new(Some(""), Some(""), false).unwrap();
        let line = reporter.render(&ok_200(), from(), &vars("1")).unwrap();
        assert!(line.starts_with("received Response 200 OK"));
    }

    #[test]
    fn test_custom_regex_and_replacement() {
        let reporter = ReplyReporter::new(
            Some(r"(?s)\ASIP/2\.0 (\d+).*CSeq: (\d+).*\z"),
            Some("code=$1 cseq=$2 peer=%(sock_src_ip)s"),
            false,
        )
        .unwrap();
        let line = reporter.render(&ok_200(), from(), &vars("3")).unwrap();
        assert_eq!(line, "code=200 cseq=3 peer=192.0.2.7");
    }

    #[test]
    fn test_custom_replacement_with_default_regex() {
        let reporter = ReplyReporter::new(None, Some("%(status)s"), false).unwrap();
        assert_eq!(reporter.render(&ok_200(), from(), &vars("0")).unwrap(), "200");
    }

    #[test]
    fn test_custom_regex_with_default_replacement() {
        // A regex matching only the start line leaves the headers after the default line.
        let reporter = ReplyReporter::new(Some(r"\ASIP/2\.0 200 OK\r\n"), None, false).unwrap();
        let line = reporter.render(&ok_200(), from(), &vars("5")).unwrap();
        assert!(line.starts_with("received Response 200 OK from 192.0.2.7:5060 cseq=5Call-ID:"));
    }

    #[test]
    fn test_missing_variable_yields_diagnostic() {
        let reporter = ReplyReporter::new(None, Some("%(nope)s"), false).unwrap();
        let failure = reporter.render(&ok_200(), from(), &vars("0")).unwrap_err();
        assert_eq!(failure.error, TemplateError::MissingVariable("nope".to_string()));
        assert_eq!(failure.regex, DEFAULT_OUT_REGEX);
        assert_eq!(failure.replacement, "%(nope)s");
        assert_eq!(failure.variables.get("status"), Some("200"));

        let text = failure.to_string();
        assert!(text.contains("missing template variable 'nope'"));
        assert!(text.contains("\t\tsock_src_port:'5060'"));
        assert!(text.contains("\tSIP/2.0 200 OK"));
    }

    #[test]
    fn test_missing_seq_is_reported_not_panicked() {
        let reporter = ReplyReporter::new(None, None, false).unwrap();
        let failure = reporter.render(&ok_200(), from(), &Variables::new()).unwrap_err();
        assert_eq!(failure.error, TemplateError::MissingVariable("seq".to_string()));
    }

    #[test]
    fn test_invalid_regex_is_config_error() {
        let result = ReplyReporter::new(Some("(unclosed"), None, false);
        assert!(matches!(result, Err(SipPingError::ConfigError(_))));
    }

    #[test]
    fn test_bind_report_fields() {
        let msg = SipMessage::Response(SipResponse::new(ResponseConfig {
            status: "486".to_string(),
            reason: "Busy Here".to_string(),
            headers: Headers::new(),
            ..Default::default()
        }));
        let bound = bind_report_fields(&msg, from(), &vars("2"));
        assert_eq!(bound.get("status"), Some("486"));
        assert_eq!(bound.get("reason"), Some("Busy Here"));
        assert_eq!(bound.get("sock_src_ip"), Some("192.0.2.7"));
        assert_eq!(bound.get("method"), None);
        assert_eq!(bound.get("seq"), Some("2"));
    }

    #[test]
    fn test_run_summary_from_snapshot() {
        let mut codes = HashMap::new();
        codes.insert(200, 3);
        let snap = StatsSnapshot {
            sent: 4,
            received: 3,
            status_codes: codes,
            ..Default::default()
        };
        let summary = RunSummary::from_snapshot(&snap, true);
        assert_eq!(summary.loss_percent, Some(25.0));
        assert_eq!(summary.status_codes.get(&200), Some(&3));
        assert!(summary.interrupted);
    }

    #[test]
    fn test_write_json_summary_roundtrip() {
        let summary = RunSummary::from_snapshot(&StatsSnapshot::default(), false);
        let file = NamedTempFile::new().unwrap();
        write_json_summary(&summary, file.path()).unwrap();
        let text = std::fs::read_to_string(file.path()).unwrap();
        let loaded: RunSummary = serde_json::from_str(&text).unwrap();
        assert_eq!(loaded, summary);
        assert_eq!(loaded.loss_percent, None);
    }
}
