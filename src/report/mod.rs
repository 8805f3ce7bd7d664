//! Renders a completed exchange for the terminal, or as JSON.

use crate::trace::{RequestHead, Timings, TracedExchange};
use chrono::{DateTime, Utc};
use http::HeaderMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("error building report: {0}")]
    Build(#[from] std::fmt::Error),
    #[error("error building report: {0}")]
    Json(#[from] serde_json::Error),
    #[error("error writing output: {0}")]
    Write(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Presentation {
    pub suppress_headers: bool,
    pub suppress_body: bool,
}

/// Formatting helpers shared by every report.
pub struct RenderFuncs {
    pub duration_millis: fn(Duration) -> String,
    pub strings_join: fn(&[String], &str) -> String,
}

pub static RENDER_FUNCS: RenderFuncs = RenderFuncs {
    duration_millis,
    strings_join,
};

fn duration_millis(duration: Duration) -> String {
    format!("{:9.2}ms", duration.as_secs_f64() * 1000.0)
}

fn strings_join(values: &[String], sep: &str) -> String {
    values.join(sep)
}

/// `content-type` -> `Content-Type`.
pub fn canonical_header_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

/// Header values grouped under their canonical name, sorted by name.
fn sorted_headers(headers: &HeaderMap) -> BTreeMap<String, Vec<String>> {
    let mut sorted = BTreeMap::new();
    for name in headers.keys() {
        let values = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect();
        sorted.insert(canonical_header_key(name.as_str()), values);
    }
    sorted
}

fn joined_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    sorted_headers(headers)
        .into_iter()
        .map(|(k, v)| (k, (RENDER_FUNCS.strings_join)(&v, "")))
        .collect()
}

/// `host[:port]` followed by the path as the caller wrote it.
fn request_target(request: &RequestHead) -> String {
    let host = request.uri.host().unwrap_or_default();
    match request.uri.port_u16() {
        Some(port) => format!("{}:{}{}", host, port, request.path),
        None => format!("{}{}", host, request.path),
    }
}

pub struct Report<'a> {
    exchange: &'a TracedExchange,
    presentation: Presentation,
    output: String,
}

impl<'a> Report<'a> {
    pub fn new(exchange: &'a TracedExchange, presentation: Presentation) -> Self {
        Report {
            exchange,
            presentation,
            output: String::new(),
        }
    }

    pub fn build(&mut self) -> Result<(), ReportError> {
        let mut out = String::new();
        self.render_text(&mut out)?;
        self.output = out;
        Ok(())
    }

    pub fn build_json(&mut self) -> Result<(), ReportError> {
        let mut out = serde_json::to_string_pretty(&self.json())?;
        out.push('\n');
        self.output = out;
        Ok(())
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn print<W: io::Write>(&self, w: &mut W) -> Result<(), ReportError> {
        w.write_all(self.output.as_bytes())?;
        w.flush()?;
        Ok(())
    }

    fn render_text(&self, out: &mut String) -> std::fmt::Result {
        let request = &self.exchange.request;
        let response = &self.exchange.response;
        let millis = RENDER_FUNCS.duration_millis;
        let t = &self.exchange.timings;

        write!(
            out,
            "> {} {} {:?}",
            request.method,
            request_target(request),
            request.version
        )?;
        for (key, value) in joined_headers(&request.headers) {
            write!(out, "\n> {}: {}", key, value)?;
        }
        write!(out, "\n>\n< {}", response.status_line())?;
        if !self.presentation.suppress_headers {
            for (key, value) in joined_headers(&response.headers) {
                write!(out, "\n< {}: {}", key, value)?;
            }
        }
        if !self.presentation.suppress_body {
            write!(out, "\n{}", self.exchange.body)?;
        }

        writeln!(out, "\n\nTrace")?;
        writeln!(out, "  Request")?;
        writeln!(out, "    Connection")?;
        writeln!(out, "      DNS Resolution:  {}", millis(t.dns))?;
        writeln!(out, "      Connecting:      {}", millis(t.connection_dial))?;
        writeln!(out, "      TLS handshake:   {}", millis(t.tls))?;
        writeln!(out, "    Connection total:  {}", millis(t.total_connection))?;
        writeln!(out)?;
        writeln!(out, "    Request write:     {}", millis(t.request_write))?;
        writeln!(out, "    Response delay:    {}", millis(t.response_delay))?;
        writeln!(out, "    Response read:     {}", millis(t.response_read))?;
        writeln!(out)?;
        writeln!(out, "  Request total:       {}", millis(t.total_request))?;
        Ok(())
    }

    fn json(&self) -> ExchangeJson<'a> {
        let exchange = self.exchange;
        ExchangeJson {
            started_at: exchange.started_at,
            request: RequestJson {
                method: exchange.request.method.as_str(),
                url: exchange.request.uri.to_string(),
                version: format!("{:?}", exchange.request.version),
                headers: joined_headers(&exchange.request.headers),
            },
            response: ResponseJson {
                status: exchange.response.status.as_u16(),
                status_line: exchange.response.status_line(),
                version: format!("{:?}", exchange.response.version),
                headers: (!self.presentation.suppress_headers)
                    .then(|| joined_headers(&exchange.response.headers)),
            },
            body: (!self.presentation.suppress_body).then_some(exchange.body.as_str()),
            body_error: exchange.body_error.as_deref(),
            timings: TimingsJson::from(&exchange.timings),
        }
    }
}

#[derive(Debug, Serialize)]
struct ExchangeJson<'a> {
    started_at: DateTime<Utc>,
    request: RequestJson<'a>,
    response: ResponseJson,
    #[serde(skip_serializing_if = "Option::is_none")]
    body: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    body_error: Option<&'a str>,
    timings: TimingsJson,
}

#[derive(Debug, Serialize)]
struct RequestJson<'a> {
    method: &'a str,
    url: String,
    version: String,
    headers: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
struct ResponseJson {
    status: u16,
    status_line: String,
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    headers: Option<BTreeMap<String, String>>,
}

/// Timings flattened to fractional milliseconds.
#[derive(Debug, Serialize)]
struct TimingsJson {
    dns_ms: f64,
    connect_ms: f64,
    tls_ms: f64,
    connection_total_ms: f64,
    request_write_ms: f64,
    response_delay_ms: f64,
    response_read_ms: f64,
    total_ms: f64,
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl From<&Timings> for TimingsJson {
    fn from(t: &Timings) -> Self {
        TimingsJson {
            dns_ms: millis(t.dns),
            connect_ms: millis(t.connection_dial),
            tls_ms: millis(t.tls),
            connection_total_ms: millis(t.total_connection),
            request_write_ms: millis(t.request_write),
            response_delay_ms: millis(t.response_delay),
            response_read_ms: millis(t.response_read),
            total_ms: millis(t.total_request),
        }
    }
}
