use std::fs;

use anyhow::{Context, Error};
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, Uri};
use http_body_util::Full;

use crate::cfg::{BodySource, Config, HttpVersion};

/// Immutable request blueprint, shared by all workers of one dispatch.
///
/// HTTP/1.1 requests use the origin-form URI with an explicit `Host` header;
/// HTTP/2 and HTTP/3 use the absolute form so the connection derives its
/// `:authority` pseudo header from it.
#[derive(Debug)]
pub struct RequestTemplate {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    token_header: Option<HeaderName>,
}

impl RequestTemplate {
    pub fn new(cfg: &Config) -> Result<Self, Error> {
        let uri = match cfg.version {
            HttpVersion::H1 => {
                let path = cfg
                    .uri
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");

                path.parse::<Uri>().context("origin-form uri")?
            }
            HttpVersion::H2 | HttpVersion::H3 => cfg.uri.clone(),
        };

        let mut headers = HeaderMap::new();
        if cfg.version == HttpVersion::H1 {
            if let Some(authority) = cfg.uri.authority() {
                headers.insert(
                    header::HOST,
                    HeaderValue::from_str(authority.as_str()).context("host header")?,
                );
            }
            if cfg.disable_keep_alive {
                headers.insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
        }
        for (name, value) in &cfg.headers {
            headers.append(name.clone(), value.clone());
        }

        let body = match &cfg.body {
            BodySource::None => Bytes::new(),
            BodySource::Inline(bytes) => bytes.clone(),
            BodySource::File(path) => {
                Bytes::from(fs::read(path).with_context(|| format!("body file {}", path.display()))?)
            }
        };

        let m = Self {
            method: cfg.method.clone(),
            uri,
            headers,
            body,
            token_header: cfg.token_header.clone(),
        };

        Ok(m)
    }

    /// Instantiates one request, attaching the token if configured.
    ///
    /// The parts being cloned here are either ref-counted or inline, so this
    /// is the whole per-send setup cost.
    pub fn request(&self, token: Option<&HeaderValue>) -> Request<Full<Bytes>> {
        let mut req = Request::new(Full::new(self.body.clone()));
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.clone();

        if let (Some(name), Some(value)) = (&self.token_header, token) {
            req.headers_mut().insert(name.clone(), value.clone());
        }

        req
    }

    /// Bodyless variant for transports that send the body as a separate
    /// frame.
    pub fn request_empty(&self, token: Option<&HeaderValue>) -> (Request<()>, Bytes) {
        let mut req = Request::new(());
        *req.method_mut() = self.method.clone();
        *req.uri_mut() = self.uri.clone();
        *req.headers_mut() = self.headers.clone();

        if let (Some(name), Some(value)) = (&self.token_header, token) {
            req.headers_mut().insert(name.clone(), value.clone());
        }

        (req, self.body.clone())
    }
}

#[cfg(test)]
mod tests {
    use core::{num::NonZero, time::Duration};

    use super::*;

    fn config(version: HttpVersion) -> Config {
        Config {
            uri: "http://localhost:8080/search?q=1".parse().unwrap(),
            version,
            method: Method::GET,
            headers: vec![(
                HeaderName::from_static("x-test"),
                HeaderValue::from_static("yes"),
            )],
            body: BodySource::None,
            connections: NonZero::new(1).unwrap(),
            requests: 1,
            duration: None,
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
            disable_keep_alive: false,
            skip_verify: false,
            mtls: None,
            token_header: None,
            tokens: None,
            claims: None,
            req_every: None,
            verbose: false,
            verbose_tick: Duration::from_secs(1),
        }
    }

    #[test]
    fn h1_uses_origin_form_with_host() {
        let template = RequestTemplate::new(&config(HttpVersion::H1)).unwrap();
        let req = template.request(None);

        assert_eq!(req.uri().to_string(), "/search?q=1");
        assert_eq!(req.headers()[header::HOST], "localhost:8080");
        assert_eq!(req.headers()["x-test"], "yes");
    }

    #[test]
    fn h2_uses_absolute_form() {
        let template = RequestTemplate::new(&config(HttpVersion::H2)).unwrap();
        let req = template.request(None);

        assert_eq!(req.uri().scheme_str(), Some("http"));
        assert_eq!(req.uri().host(), Some("localhost"));
        assert!(!req.headers().contains_key(header::HOST));
    }

    #[test]
    fn keep_alive_disabled_adds_connection_close() {
        let mut cfg = config(HttpVersion::H1);
        cfg.disable_keep_alive = true;

        let template = RequestTemplate::new(&cfg).unwrap();
        let req = template.request(None);

        assert_eq!(req.headers()[header::CONNECTION], "close");

        // The header is connection-specific and illegal in h2.
        let mut cfg = config(HttpVersion::H2);
        cfg.disable_keep_alive = true;

        let template = RequestTemplate::new(&cfg).unwrap();
        let req = template.request(None);

        assert!(!req.headers().contains_key(header::CONNECTION));
    }

    #[test]
    fn attaches_token() {
        let mut cfg = config(HttpVersion::H1);
        cfg.token_header = Some(HeaderName::from_static("x-auth"));

        let template = RequestTemplate::new(&cfg).unwrap();
        let token = HeaderValue::from_static("t42");
        let req = template.request(Some(&token));

        assert_eq!(req.headers()["x-auth"], "t42");

        // Without a token the header is absent.
        let req = template.request(None);
        assert!(!req.headers().contains_key("x-auth"));
    }
}
