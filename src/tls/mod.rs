use crate::http::client::ClientOptions;
use anyhow::Context;
use pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::ring::{default_provider, DEFAULT_CIPHER_SUITES};
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::Level;
use x509_parser::parse_x509_certificate;

/// Builds the rustls client configuration used for `https` targets.
///
/// Roots come from `--cacert` when given, otherwise from the bundled webpki
/// roots. Only HTTP/1.1 is offered over ALPN. Session keys are written to
/// `SSLKEYLOGFILE` when that variable is set.
pub fn client_config(options: &ClientOptions) -> Result<ClientConfig, anyhow::Error> {
    let mut root_store = RootCertStore::empty();
    if let Some(file_path) = options.ca_path.as_ref() {
        let f = std::fs::File::open(file_path)
            .with_context(|| format!("Failed to open CA file: {}", file_path.display()))?;
        let mut rd = std::io::BufReader::new(f);
        for cert in rustls_pemfile::certs(&mut rd) {
            root_store.add(cert?)?;
        }
    } else {
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    };

    let provider = Arc::new(CryptoProvider {
        cipher_suites: DEFAULT_CIPHER_SUITES.to_vec(),
        ..default_provider()
    });
    let verifier = PeerVerifier::new(options.insecure, provider.clone(), root_store.clone())?;

    let mut tls_config = ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(rustls::DEFAULT_VERSIONS)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    tls_config
        .dangerous()
        .set_certificate_verifier(Arc::new(verifier));
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    tls_config.key_log = Arc::new(rustls::KeyLogFile::new());

    Ok(tls_config)
}

/// Checks the server chain against the configured roots, or accepts any
/// chain under `--insecure`. At debug level the presented certificate is
/// summarised first, so a rejected chain can still be inspected.
#[derive(Debug)]
struct PeerVerifier {
    webpki: Arc<WebPkiServerVerifier>,
    insecure: bool,
}

impl PeerVerifier {
    fn new(
        insecure: bool,
        provider: Arc<CryptoProvider>,
        roots: RootCertStore,
    ) -> Result<Self, anyhow::Error> {
        let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .context("Failed to build certificate verifier")?;
        Ok(Self { webpki, insecure })
    }
}

fn describe_peer(server_name: &ServerName<'_>, end_entity: &CertificateDer<'_>) {
    let cert = match parse_x509_certificate(end_entity.as_ref()) {
        Ok((_, cert)) => cert,
        Err(e) => {
            debug!("Certificate from {:?} could not be parsed: {}", server_name, e);
            return;
        }
    };
    let names = match cert.tbs_certificate.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        _ => String::new(),
    };
    debug!(
        server = ?server_name,
        subject = %cert.subject(),
        issuer = %cert.issuer(),
        not_before = %cert.validity().not_before,
        not_after = %cert.validity().not_after,
        names = %names,
        "Peer certificate"
    );
}

impl ServerCertVerifier for PeerVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if enabled!(Level::DEBUG) {
            describe_peer(server_name, end_entity);
        }
        if self.insecure {
            debug!("Skipping certificate validation for {:?}", server_name);
            return Ok(ServerCertVerified::assertion());
        }
        self.webpki
            .verify_server_cert(end_entity, intermediates, server_name, ocsp, now)
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.webpki.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.webpki.supported_verify_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> CertificateDer<'static> {
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .unwrap()
            .cert
            .der()
            .clone()
    }

    fn verifier(insecure: bool, trusted: Option<&CertificateDer<'static>>) -> PeerVerifier {
        let mut roots = RootCertStore::empty();
        match trusted {
            Some(cert) => roots.add(cert.clone()).unwrap(),
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }
        PeerVerifier::new(insecure, Arc::new(default_provider()), roots).unwrap()
    }

    #[test]
    fn default_config_offers_http1_only() {
        let config = client_config(&ClientOptions::default()).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let options = ClientOptions {
            ca_path: Some("/nonexistent/ca.pem".into()),
            ..ClientOptions::default()
        };
        let err = client_config(&options).unwrap_err();
        assert!(err.to_string().contains("Failed to open CA file"));
    }

    #[test]
    fn trusted_certificate_is_accepted_for_its_name_only() {
        let cert = self_signed();
        let verifier = verifier(false, Some(&cert));

        let localhost = ServerName::try_from("localhost").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &localhost, &[], UnixTime::now())
            .is_ok());
        let other = ServerName::try_from("other.test").unwrap();
        assert!(verifier
            .verify_server_cert(&cert, &[], &other, &[], UnixTime::now())
            .is_err());
    }

    #[test]
    fn unknown_issuer_is_rejected_unless_insecure() {
        let cert = self_signed();
        let name = ServerName::try_from("localhost").unwrap();

        assert!(verifier(false, None)
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_err());
        assert!(verifier(true, None)
            .verify_server_cert(&cert, &[], &name, &[], UnixTime::now())
            .is_ok());
    }

    #[test]
    fn insecure_accepts_unparseable_certificates() {
        let garbage = CertificateDer::from(vec![0u8; 8]);
        let name = ServerName::try_from("example.com").unwrap();
        assert!(verifier(true, None)
            .verify_server_cert(&garbage, &[], &name, &[], UnixTime::now())
            .is_ok());
        assert!(verifier(false, None)
            .verify_server_cert(&garbage, &[], &name, &[], UnixTime::now())
            .is_err());
    }
}
