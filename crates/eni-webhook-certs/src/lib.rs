//! X.509 primitives for the ENI IP webhook: a self-signed certificate
//! authority, a serving certificate signed by it, and the PEM encoded
//! [`CertBundle`] the rest of the webhook consumes.
//!
//! ## Feature Flags
//!
//! - `rustls`: converts a [`CertBundle`] into the DER types required by
//!   `tokio-rustls` to terminate TLS.
//!
//! ## References
//!
//! - <https://datatracker.ietf.org/doc/html/rfc5280>
//! - <https://kubernetes.io/docs/reference/access-authn-authz/extensible-admission-controllers/#contacting-the-webhook>
use snafu::{ResultExt, Snafu};
use x509_cert::{Certificate, der::EncodePem};
use zeroize::Zeroizing;

use crate::{ca::PEM_LINE_ENDING, keys::rsa};

mod bundle;
mod cert_builder;

pub mod ca;
pub mod keys;

pub use bundle::*;
pub use cert_builder::*;

/// Error variants which can be encountered when serializing a
/// [`CertificatePair`].
#[derive(Debug, Snafu)]
pub enum CertificatePairError {
    #[snafu(display("failed to serialize certificate as PEM"))]
    SerializeCertificate { source: x509_cert::der::Error },

    #[snafu(display("failed to serialize private key as PKCS8 PEM"))]
    SerializePrivateKey { source: rsa::Error },
}

/// Contains the certificate and the signing / embedded key pair.
///
/// A [`CertificateAuthority`](crate::ca::CertificateAuthority) uses this
/// struct to store the key pair which self-signs the CA and signs all leaf
/// certificates. Leaf certificates use it to store the bound key pair.
#[derive(Debug)]
pub struct CertificatePair {
    certificate: Certificate,
    key_pair: rsa::SigningKey,
}

impl CertificatePair {
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn key_pair(&self) -> &rsa::SigningKey {
        &self.key_pair
    }

    pub fn certificate_pem(&self) -> Result<String, CertificatePairError> {
        self.certificate
            .to_pem(PEM_LINE_ENDING)
            .context(SerializeCertificateSnafu)
    }

    pub fn private_key_pem(&self) -> Result<Zeroizing<String>, CertificatePairError> {
        self.key_pair
            .to_pkcs8_pem()
            .context(SerializePrivateKeySnafu)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    use x509_cert::{
        Certificate,
        der::Decode,
        ext::pkix::{ID_CE_SUBJECT_ALT_NAME, SubjectAltName, name::GeneralName},
    };

    /// Returns the DNS and IP entries of the SubjectAltName extension.
    pub(crate) fn san_entries(certificate: &Certificate) -> (Vec<String>, Vec<IpAddr>) {
        let extension = certificate
            .tbs_certificate
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.extn_id == ID_CE_SUBJECT_ALT_NAME)
            .expect("cert had no SAN extension");
        let entries = SubjectAltName::from_der(extension.extn_value.as_bytes())
            .expect("failed to parse SAN")
            .0;

        let dns_names = entries
            .iter()
            .filter_map(|san| match san {
                GeneralName::DnsName(dns_name) => Some(dns_name.as_str().to_owned()),
                _ => None,
            })
            .collect();
        let ip_addresses = entries
            .iter()
            .filter_map(|san| match san {
                GeneralName::IpAddress(ip) => Some(bytes_to_ip_addr(ip.as_bytes())),
                _ => None,
            })
            .collect();

        (dns_names, ip_addresses)
    }

    pub(crate) fn bytes_to_ip_addr(bytes: &[u8]) -> IpAddr {
        match bytes.len() {
            4 => {
                let mut array = [0u8; 4];
                array.copy_from_slice(bytes);
                IpAddr::V4(Ipv4Addr::from(array))
            }
            16 => {
                let mut array = [0u8; 16];
                array.copy_from_slice(bytes);
                IpAddr::V6(Ipv6Addr::from(array))
            }
            _ => panic!(
                "Invalid IP byte length: expected 4 or 16, got {}",
                bytes.len()
            ),
        }
    }
}
