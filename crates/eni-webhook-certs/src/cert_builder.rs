use std::{net::IpAddr, time::Duration, time::SystemTime};

use const_oid::db::rfc5280::{ID_KP_CLIENT_AUTH, ID_KP_SERVER_AUTH};
use snafu::{ResultExt, Snafu, ensure};
use tracing::{debug, instrument};
use x509_cert::{
    builder::{Builder, Profile},
    der::asn1::Ia5String,
    ext::pkix::{ExtendedKeyUsage, SubjectAltName, name::GeneralName},
    name::Name,
    serial_number::SerialNumber,
    spki::SubjectPublicKeyInfoOwned,
    time::Validity,
};

use crate::{
    CertificatePair,
    ca::{CertificateAuthority, DEFAULT_CA_VALIDITY},
    keys::rsa,
};

/// Defines all error variants which can occur when creating a certificate
#[derive(Debug, Snafu)]
pub enum CreateCertificateError {
    #[snafu(display("failed to parse validity"))]
    ParseValidity { source: x509_cert::der::Error },

    #[snafu(display("failed to parse {subject:?} as subject"))]
    ParseSubject {
        source: x509_cert::der::Error,
        subject: String,
    },

    #[snafu(display("failed to create key pair"))]
    CreateKeyPair { source: rsa::Error },

    #[snafu(display("failed to encode the subject public key info"))]
    EncodeSubjectPublicKeyInfo { source: x509_cert::spki::Error },

    #[snafu(display("failed to create certificate builder"))]
    CreateCertificateBuilder { source: x509_cert::builder::Error },

    #[snafu(display("failed to add certificate extension"))]
    AddCertificateExtension { source: x509_cert::builder::Error },

    #[snafu(display(
        "failed to parse subject alternative DNS name {subject_alternative_dns_name:?} as a Ia5 string"
    ))]
    ParseSubjectAlternativeDnsName {
        subject_alternative_dns_name: String,
        source: x509_cert::der::Error,
    },

    #[snafu(display("failed to build certificate"))]
    BuildCertificate { source: x509_cert::builder::Error },

    #[snafu(display(
        "the generated certificate would outlive the CA, subject {subject:?}, \
        CA notAfter {ca_not_after:?}, cert notAfter {cert_not_after:?}"
    ))]
    CertOutlivesCa {
        subject: String,
        ca_not_after: SystemTime,
        cert_not_after: SystemTime,
    },
}

/// Builds a leaf [`CertificatePair`] signed by a [`CertificateAuthority`].
///
/// The produced certificates carry the `digitalSignature` and
/// `keyEncipherment` key usages plus the client and server authentication
/// extended key usages, which is what TLS serving certificates need.
///
/// ```no_run
/// use eni_webhook_certs::{
///     CertificateBuilder,
///     ca::{CertificateAuthority, DEFAULT_CA_VALIDITY},
/// };
///
/// let ca = CertificateAuthority::new("CN=webhook.kube-system", DEFAULT_CA_VALIDITY)
///     .expect("failed to build CA");
/// let certificate = CertificateBuilder::new("CN=webhook.kube-system.svc", &ca)
///     .subject_alternative_dns_names(&["webhook.kube-system.svc"])
///     .build()
///     .expect("failed to build certificate");
/// ```
pub struct CertificateBuilder<'a> {
    subject: &'a str,
    subject_alternative_dns_names: &'a [&'a str],
    subject_alternative_ip_addresses: &'a [IpAddr],
    validity: Duration,
    key_pair: Option<rsa::SigningKey>,
    signed_by: &'a CertificateAuthority,
}

impl<'a> CertificateBuilder<'a> {
    /// Starts a builder for a certificate with the given RFC 4514 `subject`
    /// which will be signed by `signed_by`.
    pub fn new(subject: &'a str, signed_by: &'a CertificateAuthority) -> Self {
        Self {
            subject,
            subject_alternative_dns_names: &[],
            subject_alternative_ip_addresses: &[],
            validity: DEFAULT_CA_VALIDITY,
            key_pair: None,
            signed_by,
        }
    }

    pub fn subject_alternative_dns_names(mut self, dns_names: &'a [&'a str]) -> Self {
        self.subject_alternative_dns_names = dns_names;
        self
    }

    pub fn subject_alternative_ip_addresses(mut self, ip_addresses: &'a [IpAddr]) -> Self {
        self.subject_alternative_ip_addresses = ip_addresses;
        self
    }

    /// Defaults to [`DEFAULT_CA_VALIDITY`]. Must not exceed the remaining
    /// lifetime of the signing CA.
    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Binds an existing key to the certificate instead of generating one.
    pub fn key_pair(mut self, key_pair: rsa::SigningKey) -> Self {
        self.key_pair = Some(key_pair);
        self
    }

    #[instrument(
        name = "build_certificate",
        skip(self),
        fields(subject = self.subject),
    )]
    pub fn build(self) -> Result<CertificatePair, CreateCertificateError> {
        let validity = Validity::from_now(self.validity).context(ParseValiditySnafu)?;
        let subject: Name = self.subject.parse().context(ParseSubjectSnafu {
            subject: self.subject,
        })?;

        let ca_not_after = self
            .signed_by
            .ca_cert()
            .tbs_certificate
            .validity
            .not_after
            .to_system_time();
        let cert_not_after = validity.not_after.to_system_time();

        // The CA and the leaf are created within the same second when using
        // the same validity, so equal notAfter values are fine.
        ensure!(ca_not_after >= cert_not_after, CertOutlivesCaSnafu {
            subject: self.subject,
            ca_not_after,
            cert_not_after,
        });

        let key_pair = match self.key_pair {
            Some(key_pair) => key_pair,
            None => rsa::SigningKey::new().context(CreateKeyPairSnafu)?,
        };

        let serial_number = SerialNumber::from(rand::random::<u64>());
        let spki = SubjectPublicKeyInfoOwned::from_key(key_pair.verifying_key())
            .context(EncodeSubjectPublicKeyInfoSnafu)?;

        debug!(
            certificate.subject = %subject,
            certificate.not_after = %validity.not_after,
            certificate.not_before = %validity.not_before,
            certificate.serial = %serial_number,
            certificate.san.dns_names = ?self.subject_alternative_dns_names,
            certificate.san.ip_addresses = ?self.subject_alternative_ip_addresses,
            certificate.signed_by.issuer = %self.signed_by.issuer_name(),
            certificate.public_key.algorithm = rsa::SigningKey::ALGORITHM,
            certificate.public_key.size = rsa::SigningKey::key_size(),
            "creating and signing certificate"
        );
        let mut builder = x509_cert::builder::CertificateBuilder::new(
            Profile::Leaf {
                issuer: self.signed_by.issuer_name().clone(),
                enable_key_agreement: false,
                enable_key_encipherment: true,
            },
            serial_number,
            validity,
            subject,
            spki,
            self.signed_by.signing_key().signing_key(),
        )
        .context(CreateCertificateBuilderSnafu)?;

        builder
            .add_extension(&ExtendedKeyUsage(vec![
                ID_KP_CLIENT_AUTH,
                ID_KP_SERVER_AUTH,
            ]))
            .context(AddCertificateExtensionSnafu)?;

        let mut sans = Vec::with_capacity(
            self.subject_alternative_dns_names.len() + self.subject_alternative_ip_addresses.len(),
        );
        for dns_name in self.subject_alternative_dns_names {
            let dns_name = Ia5String::new(dns_name).with_context(|_| {
                ParseSubjectAlternativeDnsNameSnafu {
                    subject_alternative_dns_name: *dns_name,
                }
            })?;
            sans.push(GeneralName::DnsName(dns_name));
        }
        sans.extend(
            self.subject_alternative_ip_addresses
                .iter()
                .copied()
                .map(GeneralName::from),
        );

        builder
            .add_extension(&SubjectAltName(sans))
            .context(AddCertificateExtensionSnafu)?;

        let certificate = builder
            .build::<::rsa::pkcs1v15::Signature>()
            .context(BuildCertificateSnafu)?;

        Ok(CertificatePair {
            certificate,
            key_pair,
        })
    }
}
