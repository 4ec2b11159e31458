use core::{num::NonZero, time::Duration};
use std::{fs, path::PathBuf};

use http::{HeaderName, HeaderValue, Method, Uri};
use thiserror::Error;

use crate::cmd::RunCmd;

/// Load run config.
///
/// Immutable once validated; everything the dispatcher and the workers need
/// is derived from here.
#[derive(Debug, Clone)]
pub struct Config {
    /// Target URI, e.g. "https://localhost:8443/some-path".
    pub uri: Uri,
    /// HTTP version to speak.
    pub version: HttpVersion,
    /// Request method.
    pub method: Method,
    /// Additional request headers, in the order given.
    pub headers: Vec<(HeaderName, HeaderValue)>,
    /// Request body.
    pub body: BodySource,
    /// Number of connections, one worker each.
    pub connections: NonZero<usize>,
    /// Total number of requests to send. Zero means no request budget.
    pub requests: u64,
    /// Wall-clock budget for the whole run. None means no time limit.
    pub duration: Option<Duration>,
    /// Per-request read timeout.
    pub read_timeout: Duration,
    /// Per-request write timeout.
    pub write_timeout: Duration,
    /// Open a fresh connection for every request.
    pub disable_keep_alive: bool,
    /// Skip TLS server certificate verification.
    pub skip_verify: bool,
    /// Client certificate for mutual TLS.
    pub mtls: Option<MtlsConfig>,
    /// Header name under which tokens are sent.
    ///
    /// Required exactly when a token source is configured.
    pub token_header: Option<HeaderName>,
    /// Source of authentication tokens, one per request.
    pub tokens: Option<TokenSource>,
    /// Custom claims handed to an external token minter, as a JSON object.
    pub claims: Option<String>,
    /// Minimum interval between two consecutive sends on one connection.
    pub req_every: Option<Duration>,
    /// Emit a running snapshot of the counters while the run is active.
    pub verbose: bool,
    /// Snapshot interval.
    pub verbose_tick: Duration,
}

/// Client certificate and key paths for mutual TLS, PEM encoded.
#[derive(Debug, Clone)]
pub struct MtlsConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVersion {
    H1,
    H2,
    H3,
}

/// Where the request body comes from.
#[derive(Debug, Clone, Default)]
pub enum BodySource {
    #[default]
    None,
    Inline(bytes::Bytes),
    File(PathBuf),
}

/// Where the token supply comes from.
#[derive(Debug, Clone)]
pub enum TokenSource {
    /// One token per line.
    File(PathBuf),
    Inline(Vec<String>),
}

/// Termination policy, derived from the configured budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop after the given number of requests.
    FixedReqs(u64),
    /// Stop when the deadline passes.
    FixedTime(Duration),
    /// Stop on whichever of the two fires first.
    FixedTimeRequests(u64, Duration),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid request uri: {0}")]
    InvalidUri(String),
    #[error("uri scheme must be http or https")]
    UnsupportedScheme,
    #[error("connections can't be more than requests")]
    ConnLimit,
    #[error("method {0} not allowed")]
    MethodNotAllowed(String),
    #[error("read timeout is zero")]
    ZeroReadTimeout,
    #[error("write timeout is zero")]
    ZeroWriteTimeout,
    #[error("ticker value can't be zero")]
    ZeroTick,
    #[error("mTLS cert does not exist")]
    MtlsCertMissing,
    #[error("mTLS private key does not exist")]
    MtlsKeyMissing,
    #[error("token file does not exist: {0}")]
    TokenFileMissing(String),
    #[error("body file does not exist")]
    BodyFileMissing,
    #[error("empty token header")]
    MissingTokenHeader,
    #[error("token header set but no token source given")]
    MissingTokenSource,
    #[error("tokens can only be sent when a request budget is set")]
    TokensWithoutBudget,
    #[error("request target and duration are both zero")]
    NoBudget,
    #[error("header {0:?} does not contain ':'")]
    MalformedHeader(String),
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("failed to parse claims, must be a JSON object")]
    InvalidClaims,
    #[error("http/3 requires an https uri")]
    H3WithoutTls,
    #[error("not enough tokens: have {have}, need {need}")]
    NotEnoughTokens { have: u64, need: u64 },
    #[error("token at line {0} is not a valid header value")]
    InvalidToken(usize),
    #[error("invalid duration {0:?}, expected e.g. \"500ms\" or \"30s\"")]
    InvalidDuration(String),
}

const ALLOWED_METHODS: [Method; 4] = [Method::GET, Method::PUT, Method::POST, Method::DELETE];

impl Config {
    /// Checks the whole config, returning the first violated rule.
    ///
    /// Must be called (and must pass) before the config reaches the
    /// dispatcher.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(ConfigError::UnsupportedScheme),
        }
        if self.uri.authority().is_none() {
            return Err(ConfigError::InvalidUri(self.uri.to_string()));
        }

        let conns = self.connections.get() as u64;
        if self.requests > 0 && conns > self.requests {
            return Err(ConfigError::ConnLimit);
        }
        // An explicit zero duration is no duration budget at all.
        if self.requests == 0 && self.duration.map_or(true, |d| d.is_zero()) {
            return Err(ConfigError::NoBudget);
        }

        if !ALLOWED_METHODS.contains(&self.method) {
            return Err(ConfigError::MethodNotAllowed(self.method.to_string()));
        }

        if self.read_timeout.is_zero() {
            return Err(ConfigError::ZeroReadTimeout);
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::ZeroWriteTimeout);
        }
        if self.verbose && self.verbose_tick.is_zero() {
            return Err(ConfigError::ZeroTick);
        }

        if let Some(mtls) = &self.mtls {
            if !is_file(&mtls.cert) {
                return Err(ConfigError::MtlsCertMissing);
            }
            if !is_file(&mtls.key) {
                return Err(ConfigError::MtlsKeyMissing);
            }
        }

        match (&self.tokens, &self.token_header) {
            (Some(..), None) => return Err(ConfigError::MissingTokenHeader),
            (None, Some(..)) => return Err(ConfigError::MissingTokenSource),
            _ => {}
        }
        if let Some(source) = &self.tokens {
            if self.requests == 0 {
                return Err(ConfigError::TokensWithoutBudget);
            }
            if let TokenSource::File(path) = source {
                if !is_file(path) {
                    return Err(ConfigError::TokenFileMissing(path.display().to_string()));
                }
            }
        }

        if let BodySource::File(path) = &self.body {
            if !is_file(path) {
                return Err(ConfigError::BodyFileMissing);
            }
        }

        if let Some(claims) = &self.claims {
            if serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(claims).is_err() {
                return Err(ConfigError::InvalidClaims);
            }
        }

        if self.version == HttpVersion::H3 && !self.is_tls() {
            return Err(ConfigError::H3WithoutTls);
        }

        Ok(())
    }

    /// Returns the termination policy.
    ///
    /// Assumes a validated config, where at least one budget is set. A zero
    /// duration counts as no duration, same as in [`validate`](Self::validate).
    pub fn mode(&self) -> Mode {
        match (self.requests, self.duration.filter(|d| !d.is_zero())) {
            (reqs, None) => Mode::FixedReqs(reqs),
            (0, Some(duration)) => Mode::FixedTime(duration),
            (reqs, Some(duration)) => Mode::FixedTimeRequests(reqs, duration),
        }
    }

    #[inline]
    pub fn is_tls(&self) -> bool {
        self.uri.scheme_str() == Some("https")
    }

    /// Target host, without the port.
    pub fn host(&self) -> &str {
        self.uri.host().unwrap_or_default()
    }

    /// Target port, defaulted from the scheme when absent.
    pub fn port(&self) -> u16 {
        match self.uri.port_u16() {
            Some(port) => port,
            None if self.is_tls() => 443,
            None => 80,
        }
    }
}

impl TryFrom<RunCmd> for Config {
    type Error = ConfigError;

    fn try_from(cmd: RunCmd) -> Result<Self, Self::Error> {
        let version = cmd.version();

        let uri: Uri = cmd
            .uri
            .parse()
            .map_err(|_| ConfigError::InvalidUri(cmd.uri.clone()))?;
        let method: Method = cmd
            .method
            .parse()
            .map_err(|_| ConfigError::MethodNotAllowed(cmd.method.clone()))?;

        let mut headers = Vec::with_capacity(cmd.headers.len());
        for raw in &cmd.headers {
            let (name, value) = raw
                .split_once(':')
                .ok_or_else(|| ConfigError::MalformedHeader(raw.clone()))?;
            let name: HeaderName = name
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidHeader(raw.clone()))?;
            let value: HeaderValue = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidHeader(raw.clone()))?;
            headers.push((name, value));
        }

        let body = match (cmd.body, cmd.body_file) {
            (Some(body), _) => BodySource::Inline(body.into()),
            (None, Some(path)) => BodySource::File(path),
            (None, None) => BodySource::None,
        };

        let token_header = match &cmd.token_header {
            Some(name) => Some(
                name.parse::<HeaderName>()
                    .map_err(|_| ConfigError::InvalidHeader(name.clone()))?,
            ),
            None => None,
        };

        let m = Self {
            uri,
            version,
            method,
            headers,
            body,
            connections: cmd.conns,
            requests: cmd.requests,
            duration: cmd.duration,
            read_timeout: cmd.read_timeout,
            write_timeout: cmd.write_timeout,
            disable_keep_alive: cmd.disable_keep_alive,
            skip_verify: cmd.skip_verify,
            mtls: match (cmd.mtls_cert, cmd.mtls_key) {
                (Some(cert), Some(key)) => Some(MtlsConfig { cert, key }),
                _ => None,
            },
            token_header,
            tokens: cmd.tokens_file.map(TokenSource::File),
            claims: cmd.claims,
            req_every: cmd.req_every,
            verbose: cmd.ticker.is_some(),
            verbose_tick: cmd.ticker.unwrap_or(Duration::from_secs(1)),
        };

        Ok(m)
    }
}

#[inline]
fn is_file(path: &std::path::Path) -> bool {
    fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
