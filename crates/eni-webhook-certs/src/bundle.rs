use std::{
    net::{IpAddr, Ipv4Addr},
    time::{Duration, SystemTime},
};

use snafu::{OptionExt, ResultExt, Snafu};
use tracing::{info, instrument};
use zeroize::Zeroizing;

use crate::{
    CertificatePairError,
    ca::{CertificateAuthority, CreateCertificateAuthorityError, tke_subject},
    cert_builder::{CertificateBuilder, CreateCertificateError},
};

/// The loopback address is always part of the serving certificate so that
/// local health probes can verify the endpoint.
pub const LOOPBACK_SAN: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[derive(Debug, Snafu)]
pub enum IssueError {
    #[snafu(display("at least one service DNS name is required to issue a certificate"))]
    MissingServiceDnsName,

    #[snafu(display("failed to create the certificate authority"))]
    CreateCertificateAuthority {
        source: CreateCertificateAuthorityError,
    },

    #[snafu(display("failed to sign the server certificate for {subject:?}"))]
    CreateServerCertificate {
        source: CreateCertificateError,
        subject: String,
    },

    #[snafu(display("failed to encode the certificate authority"))]
    EncodeCertificateAuthority { source: CertificatePairError },

    #[snafu(display("failed to encode the server certificate"))]
    EncodeServerCertificate { source: CertificatePairError },
}

/// PEM encoded output of [`issue`].
///
/// `ca_key` is kept in memory only. Nothing in this workspace persists it.
#[derive(Clone, PartialEq, Eq)]
pub struct CertBundle {
    pub ca_cert: String,
    pub ca_key: Zeroizing<String>,
    pub server_cert: String,
    pub server_key: Zeroizing<String>,
}

impl std::fmt::Debug for CertBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertBundle")
            .field("ca_cert", &self.ca_cert)
            .field("ca_key", &"<redacted>")
            .field("server_cert", &self.server_cert)
            .field("server_key", &"<redacted>")
            .finish()
    }
}

/// Returns the DNS names a Service is reachable under from inside the
/// cluster, starting with the bare `<service>.<namespace>` form.
pub fn service_dns_names(service: &str, namespace: &str) -> Vec<String> {
    let bare = format!("{service}.{namespace}");
    ["", ".svc", ".svc.cluster", ".svc.cluster.local"]
        .iter()
        .map(|suffix| format!("{bare}{suffix}"))
        .collect()
}

/// Creates a fresh self-signed CA and signs a serving certificate for the
/// given DNS names plus [`LOOPBACK_SAN`].
///
/// The CA common name is the first DNS name, the server common name is the
/// second one (or the first if only one is given). Both certificates are
/// valid for `validity`, the server certificate ending no later than the CA.
#[instrument(skip(service_dns_names), fields(dns_names = ?service_dns_names))]
pub fn issue(service_dns_names: &[String], validity: Duration) -> Result<CertBundle, IssueError> {
    let ca_common_name = service_dns_names.first().context(MissingServiceDnsNameSnafu)?;
    let server_common_name = service_dns_names.get(1).unwrap_or(ca_common_name);

    let ca = CertificateAuthority::new(&tke_subject(ca_common_name), validity)
        .context(CreateCertificateAuthoritySnafu)?;

    // The CA validity started a moment earlier, the leaf must not outlive it.
    let server_validity = ca
        .ca_cert()
        .tbs_certificate
        .validity
        .not_after
        .to_system_time()
        .duration_since(SystemTime::now())
        .map_or(validity, |remaining| remaining.min(validity));

    let server_subject = tke_subject(server_common_name);
    let dns_names = service_dns_names
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>();
    let server = CertificateBuilder::new(&server_subject, &ca)
        .subject_alternative_dns_names(&dns_names)
        .subject_alternative_ip_addresses(&[LOOPBACK_SAN])
        .validity(server_validity)
        .build()
        .context(CreateServerCertificateSnafu {
            subject: &server_subject,
        })?;

    let bundle = CertBundle {
        ca_cert: ca
            .certificate_pair()
            .certificate_pem()
            .context(EncodeCertificateAuthoritySnafu)?,
        ca_key: ca
            .certificate_pair()
            .private_key_pem()
            .context(EncodeCertificateAuthoritySnafu)?,
        server_cert: server
            .certificate_pem()
            .context(EncodeServerCertificateSnafu)?,
        server_key: server
            .private_key_pem()
            .context(EncodeServerCertificateSnafu)?,
    };

    info!(
        certificate.subject = %server_subject,
        certificate.not_after = %server.certificate().tbs_certificate.validity.not_after,
        "issued webhook serving certificate"
    );

    Ok(bundle)
}

#[cfg(feature = "rustls")]
mod rustls {
    use snafu::{OptionExt, ResultExt, Snafu};
    use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

    use super::CertBundle;

    #[derive(Debug, Snafu)]
    pub enum DecodeBundleError {
        #[snafu(display("failed to decode the PEM encoded server certificate"))]
        DecodeCertificate { source: std::io::Error },

        #[snafu(display("the bundle does not contain a server certificate"))]
        MissingCertificate,

        #[snafu(display("failed to decode the PEM encoded server key"))]
        DecodePrivateKey { source: std::io::Error },

        #[snafu(display("the bundle does not contain a server key"))]
        MissingPrivateKey,
    }

    impl CertBundle {
        /// The DER encoded serving certificate chain, leaf first.
        pub fn server_certificate_chain_der(
            &self,
        ) -> Result<Vec<CertificateDer<'static>>, DecodeBundleError> {
            let chain = rustls_pemfile::certs(&mut self.server_cert.as_bytes())
                .collect::<Result<Vec<_>, _>>()
                .context(DecodeCertificateSnafu)?;
            snafu::ensure!(!chain.is_empty(), MissingCertificateSnafu);
            Ok(chain)
        }

        pub fn server_private_key_der(&self) -> Result<PrivateKeyDer<'static>, DecodeBundleError> {
            rustls_pemfile::private_key(&mut self.server_key.as_bytes())
                .context(DecodePrivateKeySnafu)?
                .context(MissingPrivateKeySnafu)
        }
    }
}

#[cfg(feature = "rustls")]
pub use rustls::DecodeBundleError;
