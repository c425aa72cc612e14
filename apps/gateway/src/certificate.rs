//! Fake TLS identity used to terminate intercepted client TLS sessions
//!
//! One self-signed ECDSA P-256 certificate is generated per process, on first use, and
//! shared by every intercepted connection afterwards.

use once_cell::sync::OnceCell;
use rcgen::{
    CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType,
};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{error, info};

/// Loopback placeholder the certificate is issued for
const FAKE_COMMON_NAME: &str = "127.0.0.1";

/// Validity of the generated certificate (two years)
const FAKE_VALIDITY: Duration = Duration::from_secs(2 * 365 * 24 * 60 * 60);

/// Protocols offered during TLS negotiation, in preference order
pub const ALPN_PROTOCOLS: [&[u8]; 2] = [b"h2", b"http/1.1"];

#[derive(Error, Debug, Clone)]
pub enum CertError {
    #[error("Certificate generation failed: {0}")]
    Generation(String),
    #[error("TLS configuration failed: {0}")]
    Tls(String),
}

impl From<rcgen::Error> for CertError {
    fn from(e: rcgen::Error) -> Self {
        Self::Generation(e.to_string())
    }
}

impl From<rustls::Error> for CertError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e.to_string())
    }
}

/// The generated certificate and its key
pub struct FakeIdentity {
    cert: CertificateDer<'static>,
    key: PrivatePkcs8KeyDer<'static>,
}

impl FakeIdentity {
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert
    }

    pub fn key_der(&self) -> PrivateKeyDer<'static> {
        PrivateKeyDer::Pkcs8(self.key.clone_key())
    }

    /// Server config presenting this identity, offering h2 and http/1.1 via ALPN
    pub fn build_server_config(&self) -> Result<ServerConfig, CertError> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let mut server_config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![self.cert_der().clone()], self.key_der())?;
        server_config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();
        Ok(server_config)
    }
}

struct Issued {
    identity: Arc<FakeIdentity>,
    server_config: Arc<ServerConfig>,
}

/// Lazily generates and caches the fake identity
///
/// Concurrent first callers wait for a single generation. A failed generation is cached
/// as well and reported to every caller without retrying.
#[derive(Default)]
pub struct CertificateAuthority {
    issued: OnceCell<Result<Issued, CertError>>,
}

impl CertificateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    fn issued(&self) -> Result<&Issued, CertError> {
        self.issued
            .get_or_init(|| {
                info!("Generating fake TLS identity for {}", FAKE_COMMON_NAME);
                let result = issue();
                match &result {
                    Ok(_) => info!("Fake TLS identity ready"),
                    Err(e) => error!("Fake TLS identity generation failed: {}", e),
                }
                result
            })
            .as_ref()
            .map_err(|e| e.clone())
    }

    pub fn get_or_create_fake_identity(&self) -> Result<Arc<FakeIdentity>, CertError> {
        Ok(Arc::clone(&self.issued()?.identity))
    }

    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertError> {
        Ok(Arc::clone(&self.issued()?.server_config))
    }
}

fn issue() -> Result<Issued, CertError> {
    let identity = generate_identity()?;
    let server_config = Arc::new(identity.build_server_config()?);
    Ok(Issued {
        identity: Arc::new(identity),
        server_config,
    })
}

fn generate_identity() -> Result<FakeIdentity, CertError> {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;

    let mut params = CertificateParams::default();
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyCertSign,
    ];
    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ClientAuth,
        ExtendedKeyUsagePurpose::ServerAuth,
    ];

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, FAKE_COMMON_NAME);
    params.distinguished_name = dn;
    params.subject_alt_names = vec![
        SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        SanType::DnsName("localhost".try_into()?),
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + FAKE_VALIDITY;

    let cert = params.self_signed(&key)?;
    Ok(FakeIdentity {
        cert: CertificateDer::from(cert.der().to_vec()),
        key: PrivatePkcs8KeyDer::from(key.serialize_der()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_generated_once() {
        let ca = CertificateAuthority::new();
        let first = ca.get_or_create_fake_identity().unwrap();
        let second = ca.get_or_create_fake_identity().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.cert_der().is_empty());
        assert!(Arc::ptr_eq(
            &ca.server_config().unwrap(),
            &ca.server_config().unwrap()
        ));
    }

    #[test]
    fn test_concurrent_first_callers_share_one_identity() {
        let ca = Arc::new(CertificateAuthority::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ca = Arc::clone(&ca);
                std::thread::spawn(move || ca.get_or_create_fake_identity().unwrap())
            })
            .collect();

        let identities: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for identity in &identities[1..] {
            assert!(Arc::ptr_eq(&identities[0], identity));
        }
    }

    #[test]
    fn test_server_config_offers_h2_and_http11() {
        let ca = CertificateAuthority::new();
        let config = ca.server_config().unwrap();
        assert_eq!(
            config.alpn_protocols,
            vec![b"h2".to_vec(), b"http/1.1".to_vec()]
        );
    }

    #[test]
    fn test_key_matches_pkcs8_der() {
        let ca = CertificateAuthority::new();
        let identity = ca.get_or_create_fake_identity().unwrap();
        assert!(matches!(identity.key_der(), PrivateKeyDer::Pkcs8(_)));
    }
}
