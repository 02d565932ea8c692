// Probe loop: send, optionally await one reply, sleep, repeat
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::SipPingError;
use crate::generator::{load_template, GeneratedRequest, RequestGenerator};
use crate::reporter::ReplyReporter;
use crate::sip::message::SipMessage;
use crate::sip::parser::parse_sip_message;
use crate::stats::{StatsCollector, StatsSnapshot};
use crate::template::{FunctionTable, Variables};
use crate::transport::{resolve_destination, SipTransport, UdpTransport};

/// Asynchronously waits until the given `AtomicBool` flag becomes `true`.
/// Uses a short polling interval to avoid busy-waiting while remaining responsive.
pub async fn wait_for_shutdown(flag: &AtomicBool) {
    loop {
        if flag.load(Ordering::Relaxed) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Loop settings resolved from a [`Config`].
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub dest: SocketAddr,
    /// Destination as the user wrote it, for status lines.
    pub dest_host: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub aggressive: bool,
    pub quiet: bool,
    pub verbose: bool,
}

/// Why the loop stopped.
#[derive(Debug)]
pub enum StopReason {
    /// Every generated request was handled.
    Exhausted,
    /// The shutdown flag was raised.
    Interrupted,
    /// Request generation failed; nothing after the failure was sent.
    Aborted(SipPingError),
}

#[derive(Debug)]
pub struct RunReport {
    pub stats: StatsSnapshot,
    pub stop: StopReason,
}

impl RunReport {
    pub fn interrupted(&self) -> bool {
        matches!(self.stop, StopReason::Interrupted)
    }
}

enum Wait {
    Done,
    Interrupted,
}

/// Sends requests one at a time over a single transport.
pub struct Prober {
    transport: Arc<dyn SipTransport>,
    reporter: ReplyReporter,
    stats: StatsCollector,
    config: ProbeConfig,
    shutdown: Arc<AtomicBool>,
}

impl Prober {
    pub fn new(
        transport: Arc<dyn SipTransport>,
        reporter: ReplyReporter,
        config: ProbeConfig,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            transport,
            reporter,
            stats: StatsCollector::new(),
            config,
            shutdown,
        }
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Drive the loop until `requests` runs dry, the shutdown flag is raised,
    /// or a request cannot be generated.
    pub async fn run<I>(&self, requests: I) -> RunReport
    where
        I: IntoIterator<Item = Result<GeneratedRequest, SipPingError>>,
    {
        let stop = self.drive(requests).await;
        RunReport {
            stats: self.stats.snapshot(),
            stop,
        }
    }

    async fn drive<I>(&self, requests: I) -> StopReason
    where
        I: IntoIterator<Item = Result<GeneratedRequest, SipPingError>>,
    {
        for item in requests {
            if self.is_shutdown_requested() {
                return StopReason::Interrupted;
            }
            let request = match item {
                Ok(request) => request,
                Err(e) => return StopReason::Aborted(e),
            };

            if self.send(&request).await && !self.config.aggressive {
                if let Wait::Interrupted = self.await_reply(&request.variables).await {
                    return StopReason::Interrupted;
                }
            }

            if let Wait::Interrupted = self.pause().await {
                return StopReason::Interrupted;
            }
        }
        StopReason::Exhausted
    }

    /// Lines printed for a request handed to the socket. Quiet suppresses
    /// them all; verbose adds the full request after the status line.
    fn sent_lines(&self, request: &GeneratedRequest) -> Vec<String> {
        if self.config.quiet {
            return Vec::new();
        }
        let mut lines = vec![format!(
            "sent Request {} to {}:{} cseq={} len={}",
            request.method,
            self.config.dest_host,
            self.config.dest.port(),
            request.cseq_number(),
            request.bytes.len()
        )];
        if self.config.verbose {
            lines.push(format!(
                "\n=== Full request sent ===\n\n{}",
                String::from_utf8_lossy(&request.bytes)
            ));
        }
        lines
    }

    /// Every attempt counts as sent, so failed sends show up as loss.
    async fn send(&self, request: &GeneratedRequest) -> bool {
        let result = self.transport.send_to(&request.bytes, self.config.dest).await;
        self.stats.record_sent();
        for line in self.sent_lines(request) {
            eprintln!("{}", line);
        }
        match result {
            Ok(()) => true,
            Err(e) => {
                self.stats.record_send_failure();
                eprintln!("ERROR: cannot send packet to {}: {}", self.config.dest, e);
                false
            }
        }
    }

    async fn await_reply(&self, vars: &Variables) -> Wait {
        tokio::select! {
            _ = wait_for_shutdown(&self.shutdown) => Wait::Interrupted,
            received = tokio::time::timeout(self.config.timeout, self.transport.recv_from()) => {
                match received {
                    Err(_) => {
                        tracing::debug!(timeout = ?self.config.timeout, "no reply");
                        self.stats.record_timeout();
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "receive failed");
                        eprintln!("ERROR: cannot receive reply: {}", e);
                    }
                    Ok(Ok((data, from))) => self.handle_reply(&data, from, vars),
                }
                Wait::Done
            }
        }
    }

    fn handle_reply(&self, data: &[u8], from: SocketAddr, vars: &Variables) {
        self.stats.record_received();
        match parse_sip_message(data) {
            Ok(msg) => {
                if let SipMessage::Response(ref resp) = msg {
                    if let Some(code) = resp.status_code() {
                        self.stats.record_status(code);
                    }
                }
                self.reporter.emit(&msg, from, vars);
            }
            Err(e) => {
                self.stats.record_unparsable();
                eprintln!("ERROR: cannot parse reply from {}: {}", from, e);
                if self.config.verbose {
                    eprintln!("\n{}", String::from_utf8_lossy(data));
                }
            }
        }
    }

    async fn pause(&self) -> Wait {
        if self.config.interval.is_zero() {
            return Wait::Done;
        }
        tokio::select! {
            _ = wait_for_shutdown(&self.shutdown) => Wait::Interrupted,
            _ = tokio::time::sleep(self.config.interval) => Wait::Done,
        }
    }
}

/// Set up everything a run needs from `config`, then run it.
///
/// The template, the reply regex and the variable list are all checked before
/// the socket is bound, so configuration mistakes never reach the network.
pub async fn run_from_config(
    config: &Config,
    shutdown: Arc<AtomicBool>,
) -> Result<RunReport, SipPingError> {
    config
        .validate()
        .map_err(|errors| SipPingError::ConfigError(errors.join("; ")))?;
    let dest_host = config.dest_host.clone().unwrap_or_default();

    let template = load_template(config.request_template.as_deref())?;
    let reporter = ReplyReporter::new(
        config.out_regex.as_deref(),
        config.out_replace.as_deref(),
        config.verbose,
    )?;
    let variables = config.template_variables()?;

    if config.verbose {
        eprintln!("Template variables:");
        for (name, value) in variables.iter() {
            eprintln!("\t{}: '{}'", name, value);
        }
    }

    let source_ip: IpAddr = config.source_ip.parse().map_err(|e| {
        SipPingError::ConfigError(format!("invalid source ip '{}': {}", config.source_ip, e))
    })?;
    let transport = UdpTransport::bind(SocketAddr::new(source_ip, config.source_port)).await?;
    let local = transport
        .local_addr()
        .unwrap_or_else(|| SocketAddr::new(source_ip, config.source_port));
    let dest = resolve_destination(&dest_host, config.dest_port, local).await?;
    tracing::debug!(%local, %dest, "starting probe");

    let requests = RequestGenerator::new(
        template,
        variables,
        FunctionTable::builtin(),
        config.count.unwrap_or(u64::MAX),
    );
    let prober = Prober::new(
        Arc::new(transport),
        reporter,
        ProbeConfig {
            dest,
            dest_host,
            timeout: config.timeout(),
            interval: config.interval(),
            aggressive: config.aggressive,
            quiet: config.quiet,
            verbose: config.verbose,
        },
        shutdown,
    );
    Ok(prober.run(requests).await)
}
