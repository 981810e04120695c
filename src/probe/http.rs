//! HTTP(S) request probe.
//!
//! The probe performs one request per check and judges health from the
//! response status (against a configurable set of code ranges, default
//! 200-399) and optionally from a body substring. Redirects are not followed;
//! a 3xx is a verdict in its own right.
//!
//! A PROXY preamble has to be written before the HTTP exchange begins, which
//! the pooled client cannot do, so `proxy-protocol` probes run over a raw
//! plain-text connection. Combining the preamble with `https` or an
//! intermediate `proxy` is rejected at validation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HOST;
use reqwest::redirect::Policy;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout_at;
use tokio::time::Instant;
use tracing::trace;

use crate::config::parse_bool;
use crate::config::Params;
use crate::error::ConfigInvalidSnafu;
use crate::error::ProbeProgrammerSnafu;
use crate::error::Result;
use crate::probe::reject_unknown_params;
use crate::probe::CheckMethod;
use crate::probe::PARAM_PROXY_PROTO;
use crate::probe::PROXY_PROTO_V1_LOCAL;
use crate::probe::PROXY_PROTO_V2_LOCAL;
use crate::types::L3L4Addr;
use crate::types::State;

const ALLOWED_PARAMS: &[&str] = &[
    "method",
    "host",
    "uri",
    "https",
    "tls-verify",
    "proxy",
    PARAM_PROXY_PROTO,
    "request-header",
    "request",
    "response-codes",
    "response",
];

const ALLOWED_METHODS: &[&str] = &["GET", "PUT", "POST", "HEAD"];

/// HTTP request probe.
#[derive(Debug, Clone)]
pub struct HttpChecker {
    method: String,
    host: String,
    uri: String,
    https: bool,
    tls_verify: bool,
    proxy: String,
    proxy_proto: String,
    headers: BTreeMap<String, String>,
    body: String,
    response_codes: Vec<(u16, u16)>,
    response: String,
}

impl Default for HttpChecker {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            host: String::new(),
            uri: "/".to_string(),
            https: false,
            tls_verify: true,
            proxy: String::new(),
            proxy_proto: String::new(),
            headers: BTreeMap::new(),
            body: String::new(),
            response_codes: vec![(200, 399)],
            response: String::new(),
        }
    }
}

/// Parse a comma-separated list of status codes and inclusive ranges,
/// e.g. `200-299,301,404`.
fn parse_code_ranges(val: &str) -> Result<Vec<(u16, u16)>> {
    let mut ranges = Vec::new();
    for item in val.split(',') {
        let item = item.trim();
        let (lo, hi) = match item.split_once('-') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (item, item),
        };
        let parse = |s: &str| -> Result<u16> {
            match s.parse::<u16>() {
                Ok(code) if (100..=599).contains(&code) => Ok(code),
                _ => ConfigInvalidSnafu { message: format!("invalid response code {s:?}") }.fail(),
            }
        };
        let (lo, hi) = (parse(lo)?, parse(hi)?);
        if lo > hi {
            return ConfigInvalidSnafu { message: format!("inverted response code range {item:?}") }
                .fail();
        }
        ranges.push((lo, hi));
    }
    Ok(ranges)
}

fn parse_headers(val: &str) -> Result<BTreeMap<String, String>> {
    serde_json::from_str(val).map_err(|err| {
        ConfigInvalidSnafu { message: format!("invalid request-header map: {err}") }.build()
    })
}

impl HttpChecker {
    fn status_matches(&self, code: u16) -> bool {
        self.response_codes.iter().any(|&(lo, hi)| (lo..=hi).contains(&code))
    }

    /// Host header value: the configured override or the target endpoint.
    fn host_value(&self, target: &L3L4Addr) -> String {
        if self.host.is_empty() {
            target.socket_addr().to_string()
        } else {
            self.host.clone()
        }
    }

    async fn request_pooled(&self, target: &L3L4Addr, budget: Duration) -> Result<State> {
        let mut builder = reqwest::Client::builder()
            .timeout(budget)
            .redirect(Policy::none())
            .danger_accept_invalid_certs(!self.tls_verify);
        if !self.proxy.is_empty() {
            match reqwest::Proxy::all(&self.proxy) {
                Ok(proxy) => builder = builder.proxy(proxy),
                Err(err) => {
                    trace!(target = %target, error = %err, "http check: bad proxy url");
                    return Ok(State::Unhealthy);
                }
            }
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(err) => {
                trace!(target = %target, error = %err, "http check: client build failed");
                return Ok(State::Unhealthy);
            }
        };

        let scheme = if self.https { "https" } else { "http" };
        let url = format!("{scheme}://{}{}", target.socket_addr(), self.uri);
        let method = match self.method.as_str() {
            "PUT" => reqwest::Method::PUT,
            "POST" => reqwest::Method::POST,
            "HEAD" => reqwest::Method::HEAD,
            _ => reqwest::Method::GET,
        };

        let mut request = client.request(method, url).header(HOST, self.host_value(target));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if !self.body.is_empty() {
            request = request.body(self.body.clone());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                trace!(target = %target, error = %err, "http check failed");
                return Ok(State::Unhealthy);
            }
        };

        let code = response.status().as_u16();
        if !self.status_matches(code) {
            trace!(target = %target, code, "http check: status outside expected ranges");
            return Ok(State::Unhealthy);
        }
        if !self.response.is_empty() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(_) => return Ok(State::Unhealthy),
            };
            if !body.contains(&self.response) {
                trace!(target = %target, "http check: expected substring missing");
                return Ok(State::Unhealthy);
            }
        }
        Ok(State::Healthy)
    }

    /// Single-shot request over a raw connection, preceded by the PROXY
    /// preamble. Plain HTTP only.
    async fn request_raw(&self, target: &L3L4Addr) -> std::io::Result<State> {
        let mut stream = TcpStream::connect(target.socket_addr()).await?;

        match self.proxy_proto.as_str() {
            "v1" => stream.write_all(PROXY_PROTO_V1_LOCAL.as_bytes()).await?,
            "v2" => stream.write_all(&PROXY_PROTO_V2_LOCAL).await?,
            _ => {}
        }

        let mut request = format!("{} {} HTTP/1.1\r\n", self.method, self.uri);
        request.push_str(&format!("Host: {}\r\n", self.host_value(target)));
        for (name, value) in &self.headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str("Connection: close\r\n");
        if !self.body.is_empty() {
            request.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        request.push_str("\r\n");
        stream.write_all(request.as_bytes()).await?;
        if !self.body.is_empty() {
            stream.write_all(self.body.as_bytes()).await?;
        }

        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;

        let Some(code) = parse_status_line(&response) else {
            return Ok(State::Unhealthy);
        };
        if !self.status_matches(code) {
            return Ok(State::Unhealthy);
        }
        if !self.response.is_empty() {
            let body = body_section(&response);
            if !contains(body, self.response.as_bytes()) {
                return Ok(State::Unhealthy);
            }
        }
        Ok(State::Healthy)
    }
}

fn parse_status_line(response: &[u8]) -> Option<u16> {
    let line = response.split(|&b| b == b'\n').next()?;
    let text = std::str::from_utf8(line).ok()?;
    if !text.starts_with("HTTP/") {
        return None;
    }
    text.split_whitespace().nth(1)?.parse().ok()
}

fn body_section(response: &[u8]) -> &[u8] {
    response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|at| &response[at + 4..])
        .unwrap_or(&[])
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len().max(1)).any(|w| w == needle)
}

#[async_trait]
impl CheckMethod for HttpChecker {
    fn validate(&self, params: &Params) -> Result<()> {
        reject_unknown_params("http", params, ALLOWED_PARAMS)?;

        if let Some(val) = params.get("method") {
            if !ALLOWED_METHODS.contains(&val.to_uppercase().as_str()) {
                return ConfigInvalidSnafu {
                    message: format!("invalid http checker param value: method:{val}"),
                }
                .fail();
            }
        }
        if let Some(val) = params.get("uri") {
            if !val.starts_with('/') {
                return ConfigInvalidSnafu { message: format!("http uri must be absolute: {val}") }
                    .fail();
            }
        }
        for key in ["https", "tls-verify"] {
            if let Some(val) = params.get(key) {
                parse_bool(val)?;
            }
        }
        if let Some(val) = params.get("proxy") {
            if reqwest::Proxy::all(val).is_err() {
                return ConfigInvalidSnafu { message: format!("invalid http proxy url: {val}") }
                    .fail();
            }
        }
        if let Some(val) = params.get("request-header") {
            parse_headers(val)?;
        }
        if let Some(val) = params.get("response-codes") {
            parse_code_ranges(val)?;
        }

        if let Some(val) = params.get(PARAM_PROXY_PROTO) {
            let val = val.to_lowercase();
            if val != "v1" && val != "v2" {
                return ConfigInvalidSnafu {
                    message: format!("invalid http checker param value: {PARAM_PROXY_PROTO}:{val}"),
                }
                .fail();
            }
            let https = params.get("https").map(|v| parse_bool(v)).transpose()?.unwrap_or(false);
            if https || params.contains_key("proxy") {
                return ConfigInvalidSnafu {
                    message: "proxy-protocol requires plain http without an intermediate proxy",
                }
                .fail();
            }
        }
        Ok(())
    }

    fn create(&self, params: &Params) -> Result<Box<dyn CheckMethod>> {
        self.validate(params)?;
        let mut checker = HttpChecker::default();
        if let Some(val) = params.get("method") {
            checker.method = val.to_uppercase();
        }
        if let Some(val) = params.get("host") {
            checker.host = val.clone();
        }
        if let Some(val) = params.get("uri") {
            checker.uri = val.clone();
        }
        if let Some(val) = params.get("https") {
            checker.https = parse_bool(val)?;
        }
        if let Some(val) = params.get("tls-verify") {
            checker.tls_verify = parse_bool(val)?;
        }
        if let Some(val) = params.get("proxy") {
            checker.proxy = val.clone();
        }
        if let Some(val) = params.get(PARAM_PROXY_PROTO) {
            checker.proxy_proto = val.to_lowercase();
        }
        if let Some(val) = params.get("request-header") {
            checker.headers = parse_headers(val)?;
        }
        if let Some(val) = params.get("request") {
            checker.body = val.clone();
        }
        if let Some(val) = params.get("response-codes") {
            checker.response_codes = parse_code_ranges(val)?;
        }
        if let Some(val) = params.get("response") {
            checker.response = val.clone();
        }
        Ok(Box::new(checker))
    }

    async fn check(&self, target: &L3L4Addr, timeout: Duration) -> Result<State> {
        if timeout.is_zero() {
            return ProbeProgrammerSnafu { message: "zero timeout on http check" }.fail();
        }

        let deadline = Instant::now() + timeout;
        trace!(target = %target, method = %self.method, uri = %self.uri, "starting http check");

        if !self.proxy_proto.is_empty() {
            return match timeout_at(deadline, self.request_raw(target)).await {
                Ok(Ok(state)) => Ok(state),
                Ok(Err(err)) => {
                    trace!(target = %target, error = %err, "http check failed");
                    Ok(State::Unhealthy)
                }
                Err(_) => Ok(State::Unhealthy),
            };
        }

        match timeout_at(deadline, self.request_pooled(target, timeout)).await {
            Ok(verdict) => verdict,
            Err(_) => Ok(State::Unhealthy),
        }
    }
}
