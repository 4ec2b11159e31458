use std::{fs::File, io::BufReader, sync::Arc};

use anyhow::{Context, Error};
use rustls::{
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    crypto::CryptoProvider,
    pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime},
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};

use crate::cfg::{Config, HttpVersion, MtlsConfig};

/// Builds the TLS client config for one dispatch.
///
/// ALPN is pinned to the configured HTTP version so the server can't
/// negotiate us down to a different protocol than the one under test.
pub(crate) fn client_config(cfg: &Config) -> Result<ClientConfig, Error> {
    // More than one provider feature may be enabled transitively (quinn
    // pulls in ring), in which case the builder refuses to pick one.
    if CryptoProvider::get_default().is_none() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    let builder = ClientConfig::builder();

    let builder = if cfg.skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(SkipVerify::new()))
    } else {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        builder.with_root_certificates(roots)
    };

    let mut config = match &cfg.mtls {
        Some(mtls) => {
            let (certs, key) = load_client_pair(mtls)?;
            builder
                .with_client_auth_cert(certs, key)
                .context("invalid mTLS cert/key pair")?
        }
        None => builder.with_no_client_auth(),
    };

    config.alpn_protocols = match cfg.version {
        HttpVersion::H1 => vec![b"http/1.1".to_vec()],
        HttpVersion::H2 => vec![b"h2".to_vec()],
        HttpVersion::H3 => vec![b"h3".to_vec()],
    };

    Ok(config)
}

fn load_client_pair(
    mtls: &MtlsConfig,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), Error> {
    let mut reader = BufReader::new(
        File::open(&mtls.cert).with_context(|| format!("mTLS cert {}", mtls.cert.display()))?,
    );
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .context("failed to parse mTLS cert")?;

    let mut reader = BufReader::new(
        File::open(&mtls.key).with_context(|| format!("mTLS key {}", mtls.key.display()))?,
    );
    let key = rustls_pemfile::private_key(&mut reader)
        .context("failed to parse mTLS key")?
        .context("no private key found in mTLS key file")?;

    Ok((certs, key))
}

/// Accepts any server certificate.
///
/// Signatures are still checked with the default provider's algorithms so
/// the handshake itself stays intact.
#[derive(Debug)]
struct SkipVerify(Arc<CryptoProvider>);

impl SkipVerify {
    fn new() -> Self {
        let provider = CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

        Self(provider)
    }
}

impl ServerCertVerifier for SkipVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
