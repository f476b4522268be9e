use rustls::{
    client::{danger::ServerCertVerifier, WebPkiServerVerifier},
    server::WebPkiClientVerifier,
    CertificateError, ClientConfig, RootCertStore, ServerConfig,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::{Arc, Once};
use tls_stream_core::Error;

/// Flags passed to [`ContextBuilder::new`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextFlags(u8);

impl ContextFlags {
    /// Initialize the underlying crypto library's default provider once per
    /// process.
    pub const LIB_INIT: Self = Self(0x01);
    /// Raise the crate's tracing spans from `debug` to `trace`.
    pub const DEBUG: Self = Self(0x02);
    pub const NONE: Self = Self(0x00);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for ContextFlags {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Verify policy bits, combined with bitwise-or.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifyFlags(u8);

impl VerifyFlags {
    /// The peer must present a chain that validates against trusted roots.
    pub const PEER_CERT: Self = Self(0x01);
    /// The peer's certificate must match the connection's hostname.
    pub const PEER_IDENT: Self = Self(0x02);
    pub const NONE: Self = Self(0x00);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for VerifyFlags {
    type Output = Self;
    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

static LIB_INIT: Once = Once::new();

fn install_default_crypto_provider() {
    LIB_INIT.call_once(|| {
        // Installing twice across the process would panic; `Once` gives us
        // the "process-wide lazy-init guard" from the design notes even if
        // multiple `Context`s are built with `LIB_INIT` set.
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// A shared, read-mostly pool of TLS configuration: trust anchors, optional
/// local identity, and a verify-policy bitmask. Created once via
/// [`ContextBuilder`] and attached to many [`crate::engine::TlsEngine`]s.
pub struct Context {
    pub(crate) root_store: RootCertStore,
    pub(crate) identity: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)>,
    pub(crate) verify_flags: VerifyFlags,
    pub(crate) flags: ContextFlags,
}

/// Builds a [`Context`]. Populate fully before calling [`Self::build`];
/// contexts are not mutated after their first `Connection` attaches.
pub struct ContextBuilder {
    flags: ContextFlags,
    root_store: RootCertStore,
    cert_chain: Option<Vec<CertificateDer<'static>>>,
    private_key: Option<PrivateKeyDer<'static>>,
    verify_flags: VerifyFlags,
}

impl ContextBuilder {
    pub fn new(flags: ContextFlags) -> Self {
        if flags.contains(ContextFlags::LIB_INIT) {
            install_default_crypto_provider();
        }
        Self {
            flags,
            root_store: RootCertStore::empty(),
            cert_chain: None,
            private_key: None,
            verify_flags: VerifyFlags::NONE,
        }
    }

    pub fn set_verify_flags(&mut self, mask: VerifyFlags) -> &mut Self {
        self.verify_flags = mask;
        self
    }

    /// Parses `pem` (possibly containing multiple certificates) and adds
    /// each as a trust anchor. PEM parsing is delegated to `rustls-pemfile`.
    pub fn add_trusted_certs(&mut self, pem: &[u8]) -> Result<&mut Self, Error> {
        let mut reader = std::io::Cursor::new(pem);
        for cert in rustls_pemfile::certs(&mut reader) {
            let cert = cert.map_err(|_| Error::Einval)?;
            self.root_store.add(cert).map_err(|_| Error::Einval)?;
        }
        Ok(self)
    }

    /// Sets this context's local certificate chain (leaf first). May be
    /// called before or after [`Self::set_private_key`].
    pub fn set_cert(&mut self, pem: &[u8]) -> Result<&mut Self, Error> {
        let mut reader = std::io::Cursor::new(pem);
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
            .collect::<Result<_, _>>()
            .map_err(|_| Error::Einval)?;
        if chain.is_empty() {
            return Err(Error::Einval);
        }
        self.cert_chain = Some(chain);
        Ok(self)
    }

    /// Sets this context's private key, matching the chain from
    /// [`Self::set_cert`].
    pub fn set_private_key(&mut self, pem: &[u8]) -> Result<&mut Self, Error> {
        let mut reader = std::io::Cursor::new(pem);
        let key = rustls_pemfile::private_key(&mut reader)
            .map_err(|_| Error::Einval)?
            .ok_or(Error::Einval)?;
        self.private_key = Some(key);
        Ok(self)
    }

    /// Validates and freezes the configuration.
    ///
    /// `PEER_IDENT` without `PEER_CERT` is rejected as invalid configuration:
    /// checking identity presupposes having already checked the chain.
    pub fn build(self) -> Result<Arc<Context>, Error> {
        if self.verify_flags.contains(VerifyFlags::PEER_IDENT)
            && !self.verify_flags.contains(VerifyFlags::PEER_CERT)
        {
            return Err(Error::Einval);
        }
        let identity = match (self.cert_chain, self.private_key) {
            (Some(certs), Some(key)) => Some((certs, key)),
            (None, None) => None,
            // a chain without a key (or vice versa) is a malformed config
            _ => return Err(Error::Einval),
        };
        Ok(Arc::new(Context {
            root_store: self.root_store,
            identity,
            verify_flags: self.verify_flags,
            flags: self.flags,
        }))
    }
}

impl Context {
    pub(crate) fn client_config(&self) -> Result<Arc<ClientConfig>, Error> {
        let wants_client_cert = if self.verify_flags.contains(VerifyFlags::PEER_IDENT) {
            // PEER_IDENT implies PEER_CERT (enforced in `ContextBuilder::build`):
            // the stock verifier checks both the chain and the hostname.
            ClientConfig::builder().with_root_certificates(self.root_store.clone())
        } else if self.verify_flags.contains(VerifyFlags::PEER_CERT) {
            // Chain validation without hostname pinning: rustls's stock
            // verifier always checks both together, so wrap it and treat a
            // hostname mismatch as the one error it's allowed to waive.
            let inner = WebPkiServerVerifier::builder(Arc::new(self.root_store.clone()))
                .build()
                .map_err(|_| Error::Einval)?;
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainOnlyVerify(inner)))
        } else {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoServerVerify))
        };

        let cfg = match &self.identity {
            Some((certs, key)) => wants_client_cert
                .with_client_auth_cert(certs.clone(), key.clone_key())
                .map_err(|_| Error::Einval)?,
            None => wants_client_cert.with_no_client_auth(),
        };
        Ok(Arc::new(cfg))
    }

    pub(crate) fn server_config(&self) -> Result<Arc<ServerConfig>, Error> {
        let (certs, key) = self
            .identity
            .as_ref()
            .ok_or(Error::Einval)?;

        let builder = ServerConfig::builder();
        let cfg = if self.verify_flags.contains(VerifyFlags::PEER_CERT) {
            let verifier = WebPkiClientVerifier::builder(Arc::new(self.root_store.clone()))
                .build()
                .map_err(|_| Error::Einval)?;
            builder
                .with_client_cert_verifier(verifier)
                .with_single_cert(certs.clone(), key.clone_key())
        } else {
            builder
                .with_no_client_auth()
                .with_single_cert(certs.clone(), key.clone_key())
        }
        .map_err(|_| Error::Einval)?;

        Ok(Arc::new(cfg))
    }

    pub(crate) fn debug_logging(&self) -> bool {
        self.flags.contains(ContextFlags::DEBUG)
    }
}

/// Installed in place of the default verifier when `PEER_CERT` is not
/// requested. `rustls` has no "don't verify" builtin by design, so callers
/// that want to skip certificate verification get an explicit, clearly
/// named opt-out type instead of a hidden flag.
#[derive(Debug)]
struct NoServerVerify;

impl rustls::client::danger::ServerCertVerifier for NoServerVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &rustls_pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Installed when `PEER_CERT` is requested without `PEER_IDENT`: wraps the
/// stock chain verifier and waives only a hostname mismatch, since rustls's
/// builtin verifier has no way to check the chain without also pinning the
/// hostname passed to `ClientConnection::new`.
#[derive(Debug)]
struct ChainOnlyVerify(Arc<WebPkiServerVerifier>);

impl rustls::client::danger::ServerCertVerifier for ChainOnlyVerify {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &rustls_pki_types::ServerName<'_>,
        ocsp_response: &[u8],
        now: rustls_pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        match self
            .0
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(rustls::client::danger::ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        self.0.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.supported_verify_schemes()
    }
}
