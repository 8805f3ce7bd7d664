//! Traces a single HTTP exchange.
//!
//! A [`Tracer`] owns one request and the [`Timings`] of the exchange that
//! sends it. The transport reports phase boundaries as [`PhaseEvent`]s over a
//! channel; the tracer is the only writer of the record and folds the events
//! once the response body has been read.

pub mod error;
pub mod timings;

pub use error::TraceError;
pub use timings::{Phase, PhaseEvent, PhaseSink, Timings};

use crate::http::TracingClient;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, StatusCode, Uri, Version};
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::str::FromStr;
use std::time::Instant;

/// Request extension holding the URL path exactly as written.
///
/// `Uri` reports `/` for an absolute URL without a path, so a request built
/// from `https://example.com` carries `RawPath("")` to keep it empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPath(pub String);

impl RawPath {
    /// The path of `url` without query or fragment; empty when there is none.
    pub fn of(url: &str) -> Self {
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let rest = rest.split(['?', '#']).next().unwrap_or_default();
        RawPath(rest.find('/').map_or("", |i| &rest[i..]).to_string())
    }
}

/// The outgoing request as it was sent, minus the body.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: Method,
    pub uri: Uri,
    /// Path shown on the request line.
    pub path: String,
    pub version: Version,
    pub headers: HeaderMap,
}

impl<B> From<&Request<B>> for RequestHead {
    fn from(request: &Request<B>) -> Self {
        let path = match request.extensions().get::<RawPath>() {
            Some(RawPath(path)) => path.clone(),
            None => request.uri().path().to_string(),
        };
        RequestHead {
            method: request.method().clone(),
            uri: request.uri().clone(),
            path,
            version: request.version(),
            headers: request.headers().clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    /// Reason phrase sent by the server when it differs from the canonical one.
    pub reason: Option<String>,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    fn from_parts(parts: &http::response::Parts) -> Self {
        let reason = parts
            .extensions
            .get::<hyper::ext::ReasonPhrase>()
            .map(|r| String::from_utf8_lossy(r.as_bytes()).into_owned());
        ResponseHead {
            status: parts.status,
            reason,
            version: parts.version,
            headers: parts.headers.clone(),
        }
    }

    /// `200 OK` style status line.
    pub fn status_line(&self) -> String {
        let reason = self
            .reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("");
        format!("{} {}", self.status.as_str(), reason)
    }
}

/// Everything a completed exchange produced.
#[derive(Debug, Clone)]
pub struct TracedExchange {
    pub request: RequestHead,
    pub response: ResponseHead,
    /// Body text, or a placeholder describing why it could not be read.
    pub body: String,
    pub body_error: Option<String>,
    pub timings: Timings,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Created,
    Executing,
    Completed,
    Failed,
}

impl TraceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceState::Created => "created",
            TraceState::Executing => "executing",
            TraceState::Completed => "completed",
            TraceState::Failed => "failed",
        }
    }
}

/// Splits a raw `Name: Value` line on its first colon.
pub fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue), TraceError> {
    let (name, value) = raw
        .split_once(':')
        .ok_or_else(|| TraceError::MalformedHeader(raw.to_string()))?;
    let invalid = |reason: String| TraceError::InvalidHeader {
        raw: raw.to_string(),
        reason,
    };
    let name = HeaderName::from_str(name.trim()).map_err(|e| invalid(e.to_string()))?;
    let value = HeaderValue::from_str(value.trim()).map_err(|e| invalid(e.to_string()))?;
    Ok((name, value))
}

/// One traced request.
///
/// Not safe to `execute` concurrently; each instance runs exactly one exchange.
pub struct Tracer<'c> {
    client: &'c TracingClient,
    request: Request<Full<Bytes>>,
    state: TraceState,
    exchange: Option<TracedExchange>,
}

impl<'c> Tracer<'c> {
    pub fn new(client: &'c TracingClient, request: Request<Full<Bytes>>) -> Self {
        Tracer {
            client,
            request,
            state: TraceState::Created,
            exchange: None,
        }
    }

    /// Sets each `Name: Value` line on the request, replacing earlier values.
    ///
    /// Nothing is applied if any line is invalid.
    pub fn set_headers<I, S>(&mut self, raw: I) -> Result<(), TraceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.expect_created()?;
        let parsed = raw
            .into_iter()
            .map(|line| parse_header(line.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        for (name, value) in parsed {
            self.request.headers_mut().insert(name, value);
        }
        Ok(())
    }

    pub async fn execute(&mut self) -> Result<(), TraceError> {
        self.expect_created()?;
        self.state = TraceState::Executing;
        match self.run().await {
            Ok(exchange) => {
                self.exchange = Some(exchange);
                self.state = TraceState::Completed;
                Ok(())
            }
            Err(e) => {
                self.state = TraceState::Failed;
                Err(e)
            }
        }
    }

    async fn run(&self) -> Result<TracedExchange, TraceError> {
        let (sink, mut events) = PhaseSink::channel();
        let timeout = self.client.timeout();
        let started_at = Utc::now();
        let start = Instant::now();
        let deadline = timeout.map(|t| tokio::time::Instant::from_std(start + t));
        let limit = timeout.unwrap_or_default();

        let response = match before(deadline, self.client.send(self.outgoing(), &sink)).await {
            Some(Ok(response)) => response,
            Some(Err(err)) => return Err(TraceError::Transport(err)),
            None => return Err(TraceError::Timeout(limit)),
        };

        let (parts, incoming) = response.into_parts();
        let (body, body_error) = match before(deadline, incoming.collect()).await {
            Some(Ok(collected)) => (
                String::from_utf8_lossy(&collected.to_bytes()).into_owned(),
                None,
            ),
            Some(Err(err)) => body_read_failure(err.to_string()),
            None => body_read_failure(format!("timed out after {:?}", limit)),
        };
        let finished = start.elapsed();

        let mut timings = Timings::new();
        timings.observe_all(start, &mut events);
        timings.finish(finished);

        Ok(TracedExchange {
            request: RequestHead::from(&self.request),
            response: ResponseHead::from_parts(&parts),
            body,
            body_error,
            timings,
            started_at,
        })
    }

    // The request stays with the tracer for reporting; the transport gets a copy.
    fn outgoing(&self) -> Request<Full<Bytes>> {
        let mut outgoing = Request::new(self.request.body().clone());
        *outgoing.method_mut() = self.request.method().clone();
        *outgoing.uri_mut() = self.request.uri().clone();
        *outgoing.version_mut() = self.request.version();
        *outgoing.headers_mut() = self.request.headers().clone();
        outgoing
    }

    fn expect_created(&self) -> Result<(), TraceError> {
        match self.state {
            TraceState::Created => Ok(()),
            other => Err(TraceError::InvalidState(other.as_str())),
        }
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    pub fn request(&self) -> &Request<Full<Bytes>> {
        &self.request
    }

    pub fn response(&self) -> Option<&ResponseHead> {
        self.exchange.as_ref().map(|e| &e.response)
    }

    /// Empty until the exchange has completed.
    pub fn response_body(&self) -> &str {
        self.exchange.as_ref().map_or("", |e| e.body.as_str())
    }

    pub fn timings(&self) -> Option<&Timings> {
        self.exchange.as_ref().map(|e| &e.timings)
    }

    pub fn exchange(&self) -> Option<&TracedExchange> {
        self.exchange.as_ref()
    }

    pub fn into_exchange(self) -> Option<TracedExchange> {
        self.exchange
    }
}

/// Runs `fut` to completion, or gives up at `deadline` when there is one.
async fn before<F: Future>(deadline: Option<tokio::time::Instant>, fut: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, fut).await.ok(),
        None => Some(fut.await),
    }
}

fn body_read_failure(cause: String) -> (String, Option<String>) {
    let message = format!("Error reading response body: {}", cause);
    error!("{}", message);
    (message, Some(cause))
}
