use crate::cli::app_config::Cli;
use crate::http::TracingClient;
use crate::report::Report;
use crate::trace::{RawPath, TraceError, Tracer};
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::Request;
use std::io::Write;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

pub async fn main_with_error() -> Result<(), anyhow::Error> {
    let cli: Cli = Cli::parse();
    init_logging(cli.verbosity)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    do_request(cli, &mut out).await
}

fn init_logging(verbosity: u8) -> Result<(), anyhow::Error> {
    let log_level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy()
        .add_directive("rustls=warn".parse()?);
    let subscriber = tracing_subscriber::fmt()
        .without_time()
        .with_level(false)
        .with_target(false)
        .with_span_events(FmtSpan::NONE)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
    Ok(())
}

/// Runs one traced request described by `cli` and writes the report to `out`.
pub async fn do_request<W: Write>(cli: Cli, out: &mut W) -> Result<(), anyhow::Error> {
    let url = cli.url.as_deref().ok_or(anyhow!("no url specified"))?;
    let request = build_request(&cli, url)?;
    let client = TracingClient::new(cli.client_options())?;

    let mut tracer = Tracer::new(&client, request);
    tracer.set_headers(&cli.headers)?;
    tracer.execute().await?;
    let exchange = tracer
        .into_exchange()
        .ok_or(anyhow!("request completed without a response"))?;

    let mut report = Report::new(&exchange, cli.presentation());
    if cli.json {
        report.build_json()?;
    } else {
        report.build()?;
    }
    report.print(out)?;
    Ok(())
}

fn build_request(cli: &Cli, url: &str) -> Result<Request<Full<Bytes>>, anyhow::Error> {
    let body = cli
        .body_option
        .clone()
        .map_or(Full::new(Bytes::new()), |v| Full::new(Bytes::from(v)));
    let request = Request::builder()
        .method(cli.method.as_str())
        .uri(url)
        .extension(RawPath::of(url))
        .body(body)
        .map_err(TraceError::from)?;
    match request.uri().scheme_str() {
        Some("http") | Some("https") => Ok(request),
        _ => Err(anyhow!("Can not find scheme in the uri:{}.", request.uri())),
    }
}
