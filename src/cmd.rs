use core::{num::NonZero, time::Duration};
use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::cfg::{ConfigError, HttpVersion};

/// HTTP load generator.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
#[command(flatten_help = true)]
pub struct Cmd {
    #[clap(subcommand)]
    pub mode: ModeCmd,
    /// Be verbose in terms of logging.
    #[clap(short, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Debug, Clone, Parser)]
pub enum ModeCmd {
    /// Run a load test against the target endpoint.
    Run(RunCmd),
    /// Start a local HTTP server to point a load test at.
    Serve(ServeCmd),
}

#[derive(Debug, Clone, Parser)]
pub struct RunCmd {
    /// Target URI, e.g. https://localhost:8443/some-path.
    #[clap(required = true)]
    pub uri: String,
    /// Number of connections. Each connection is driven by its own worker.
    #[clap(short, long, default_value_t = NonZero::<usize>::MIN)]
    pub conns: NonZero<usize>,
    /// Total number of requests to send across all connections.
    ///
    /// Zero means no request budget; a duration must be given instead.
    #[clap(short, long, default_value_t = 0)]
    pub requests: u64,
    /// Wall-clock budget for the run, e.g. "30s".
    #[clap(short = 't', long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
    /// Request method.
    #[clap(short, long, default_value = "GET")]
    pub method: String,
    /// Additional request header, as "Name: value". May be repeated.
    #[clap(short = 'H', long = "header")]
    pub headers: Vec<String>,
    /// Inline request body.
    #[clap(short, long)]
    pub body: Option<String>,
    /// Read the request body from this file.
    #[clap(long, conflicts_with = "body")]
    pub body_file: Option<PathBuf>,
    /// Speak HTTP/2 instead of HTTP/1.1.
    #[clap(long, conflicts_with = "http3")]
    pub http2: bool,
    /// Speak HTTP/3 (QUIC). Requires an https target.
    #[clap(long)]
    pub http3: bool,
    /// Per-request read timeout.
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub read_timeout: Duration,
    /// Per-request write timeout.
    #[clap(long, value_parser = parse_duration, default_value = "5s")]
    pub write_timeout: Duration,
    /// Open a fresh connection for every request.
    #[clap(short = 'k', long)]
    pub disable_keep_alive: bool,
    /// Skip TLS server certificate verification.
    #[clap(long)]
    pub skip_verify: bool,
    /// Client certificate for mutual TLS, PEM encoded.
    #[clap(long, requires = "mtls_key")]
    pub mtls_cert: Option<PathBuf>,
    /// Client private key for mutual TLS, PEM encoded.
    #[clap(long, requires = "mtls_cert")]
    pub mtls_key: Option<PathBuf>,
    /// File with pre-minted tokens, one per line, consumed one per request.
    #[clap(long)]
    pub tokens_file: Option<PathBuf>,
    /// Header name under which tokens are sent, e.g. "Authorization".
    #[clap(long)]
    pub token_header: Option<String>,
    /// Custom claims for an external token minter, as a JSON object.
    #[clap(long)]
    pub claims: Option<String>,
    /// Minimum interval between two sends on one connection, e.g. "100ms".
    #[clap(long, value_parser = parse_duration)]
    pub req_every: Option<Duration>,
    /// Print a running snapshot of the counters at this interval.
    #[clap(long, value_parser = parse_duration)]
    pub ticker: Option<Duration>,
}

impl RunCmd {
    pub fn version(&self) -> HttpVersion {
        if self.http3 {
            HttpVersion::H3
        } else if self.http2 {
            HttpVersion::H2
        } else {
            HttpVersion::H1
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct ServeCmd {
    /// Port to listen on.
    #[clap(short, long, default_value_t = 8080)]
    pub port: u16,
    /// Response body size in bytes.
    #[clap(short = 's', long, default_value_t = 10)]
    pub response_size: usize,
    /// Delay each response by this long.
    #[clap(long, value_parser = parse_duration)]
    pub delay: Option<Duration>,
}

/// Parses durations with "ms", "s", "m" and "h" suffixes.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();

    let (num, unit) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60 * 1000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 60 * 60 * 1000)
    } else {
        return Err(ConfigError::InvalidDuration(s.into()));
    };

    let n: u64 = num
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(s.into()))?;

    Ok(Duration::from_millis(n * unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn run_cmd_to_config() {
        let cmd = Cmd::parse_from([
            "volley",
            "run",
            "http://localhost:8080/path",
            "-c",
            "4",
            "-r",
            "100",
            "-H",
            "X-Test: yes",
        ]);

        let ModeCmd::Run(run) = cmd.mode else {
            panic!("expected run subcommand");
        };
        let cfg: crate::cfg::Config = run.try_into().unwrap();

        assert_eq!(cfg.connections.get(), 4);
        assert_eq!(cfg.requests, 100);
        assert_eq!(cfg.headers.len(), 1);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_header_without_colon() {
        let cmd = Cmd::parse_from(["volley", "run", "http://localhost:8080/", "-r", "1", "-H", "bogus"]);

        let ModeCmd::Run(run) = cmd.mode else {
            panic!("expected run subcommand");
        };
        let err = crate::cfg::Config::try_from(run).unwrap_err();

        assert!(matches!(err, ConfigError::MalformedHeader(..)));
    }
}
