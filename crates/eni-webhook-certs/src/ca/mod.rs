//! Contains types and functions to generate a self-signed certificate
//! authority (CA) which signs the webhook serving certificate.
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tracing::{debug, instrument};
use x509_cert::{
    Certificate,
    builder::{Builder, CertificateBuilder, Profile},
    der::referenced::OwnedToRef,
    ext::pkix::AuthorityKeyIdentifier,
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

use crate::{CertificatePair, keys::rsa};

mod consts;
pub use consts::*;

/// Defines all error variants which can occur when creating a CA
#[derive(Debug, Snafu)]
pub enum CreateCertificateAuthorityError {
    #[snafu(display("failed to parse validity"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to parse {subject:?} as subject"))]
    ParseSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("failed to create signing key pair"))]
    CreateSigningKeyPair { source: rsa::Error },

    #[snafu(display("failed to encode the subject public key info"))]
    EncodeSubjectPublicKeyInfo { source: x509_cert::spki::Error },

    #[snafu(display("failed to parse AuthorityKeyIdentifier"))]
    ParseAuthorityKeyIdentifier { source: x509_cert::der::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },
}

/// A self-signed root certificate authority which signs leaf certificates.
///
/// The CA certificate contains the public half of its signing key and is
/// signed by the private half. Only the certificate leaves the process, the
/// key is dropped together with this struct.
#[derive(Debug)]
pub struct CertificateAuthority {
    certificate_pair: CertificatePair,
}

impl CertificateAuthority {
    /// Creates a new CA with a freshly generated RSA signing key.
    pub fn new(subject: &str, validity: Duration) -> Result<Self, CreateCertificateAuthorityError> {
        let signing_key_pair = rsa::SigningKey::new().context(CreateSigningKeyPairSnafu)?;
        Self::new_with_signing_key(subject, validity, signing_key_pair)
    }

    #[instrument(name = "build_certificate_authority", skip(validity, signing_key_pair))]
    pub fn new_with_signing_key(
        subject: &str,
        validity: Duration,
        signing_key_pair: rsa::SigningKey,
    ) -> Result<Self, CreateCertificateAuthorityError> {
        let validity = Validity::from_now(validity).context(ParseValiditySnafu)?;
        let subject_name: Name = subject.parse().context(ParseSubjectSnafu { subject })?;

        // A random 64 bit serial is unique enough for a single CA per process.
        let serial_number = SerialNumber::from(rand::random::<u64>());

        let spki = SubjectPublicKeyInfoOwned::from_key(signing_key_pair.verifying_key())
            .context(EncodeSubjectPublicKeyInfoSnafu)?;

        // The root profile adds a critical BasicConstraints (CA = true), a
        // SubjectKeyIdentifier and KeyUsage with KeyCertSign and CRLSign. It
        // does not add an AuthorityKeyIdentifier, which is derived here from
        // the SHA-1 hash of the public key (RFC 5280, section 4.2.1.2).
        let aki = AuthorityKeyIdentifier::try_from(spki.owned_to_ref())
            .context(ParseAuthorityKeyIdentifierSnafu)?;

        debug!(
            ca.subject = %subject_name,
            ca.not_after = %validity.not_after,
            ca.not_before = %validity.not_before,
            ca.serial = ?serial_number,
            ca.public_key.algorithm = rsa::SigningKey::ALGORITHM,
            ca.public_key.size = rsa::SigningKey::key_size(),
            "creating certificate authority"
        );
        let mut builder = CertificateBuilder::new(
            Profile::Root,
            serial_number,
            validity,
            subject_name,
            spki,
            signing_key_pair.signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&aki)
            .context(AddCertificateExtensionSnafu)?;
        let certificate = builder
            .build::<::rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)?;

        Ok(Self {
            certificate_pair: CertificatePair {
                certificate,
                key_pair: signing_key_pair,
            },
        })
    }

    pub fn signing_key(&self) -> &rsa::SigningKey {
        self.certificate_pair.key_pair()
    }

    pub fn ca_cert(&self) -> &Certificate {
        self.certificate_pair.certificate()
    }

    pub fn certificate_pair(&self) -> &CertificatePair {
        &self.certificate_pair
    }

    /// The issuer name of leaf certificates signed by this CA, which is the
    /// subject of the self-signed CA certificate.
    pub fn issuer_name(&self) -> &Name {
        &self.ca_cert().tbs_certificate.subject
    }
}
