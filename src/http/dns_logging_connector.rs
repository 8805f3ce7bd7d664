use crate::trace::timings::{Phase, PhaseSink};
use anyhow::Context;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

#[derive(Clone, Debug, Default)]
pub struct DnsLoggingResolver;

impl DnsLoggingResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolves `host` to the addresses to dial, reporting the lookup as the
    /// DNS phase. IP literals are not looked up and report nothing.
    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        sink: &PhaseSink,
    ) -> Result<Vec<SocketAddr>, anyhow::Error> {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = bare.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        debug!("Resolving DNS for: {}", host);
        let owned = host.to_string();
        sink.emit(Phase::DnsStart);
        let lookup = tokio::task::spawn_blocking(move || (owned, port).to_socket_addrs()).await;
        sink.emit(Phase::DnsDone);

        let addresses: Vec<_> = lookup
            .context("DNS lookup task failed")?
            .with_context(|| format!("failed to resolve host {}", host))?
            .collect();

        if addresses.is_empty() {
            error!("DNS resolution for {} returned no addresses.", host);
            return Err(anyhow!("No IP addresses found for host {}", host));
        }

        for (i, addr) in addresses.iter().enumerate() {
            if i == 0 {
                debug!("Resolved IP: {}", addr.ip());
            } else {
                debug!("Resolved IP (alternative): {}", addr.ip());
            }
        }

        Ok(addresses)
    }
}
