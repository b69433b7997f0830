//! Thin wrapper around the [`rsa`] crate producing PKCS#1 v1.5 / SHA-256
//! signing keys.
use rand_core::{CryptoRngCore, OsRng};
use rsa::{
    RsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding},
};
use signature::Keypair;
use snafu::{ResultExt, Snafu};
use tracing::instrument;
use zeroize::Zeroizing;

#[cfg(not(test))]
const KEY_SIZE: usize = 2048;

#[cfg(test)]
const KEY_SIZE: usize = 1024;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, PartialEq, Snafu)]
pub enum Error {
    #[snafu(display("failed to create RSA key"))]
    CreateKey { source: rsa::Error },

    #[snafu(display("failed to deserialize the signing (private) key from PEM-encoded PKCS8"))]
    DeserializeSigningKey { source: rsa::pkcs8::Error },

    #[snafu(display("failed to serialize the signing (private) key as PEM-encoded PKCS8"))]
    SerializeSigningKey { source: rsa::pkcs8::Error },
}

#[derive(Debug)]
pub struct SigningKey(rsa::pkcs1v15::SigningKey<sha2::Sha256>);

impl SigningKey {
    /// The name of the key algorithm, used in log fields.
    pub const ALGORITHM: &str = "rsa";

    /// Generates a new RSA key with the operating system random-number
    /// generator [`OsRng`].
    ///
    /// Generating a key of [`Self::key_size`] bits can take a noticeable
    /// fraction of a second in release builds and several seconds in debug
    /// builds.
    #[instrument(name = "create_rsa_signing_key")]
    pub fn new() -> Result<Self> {
        let mut csprng = OsRng;
        Self::new_with_rng(&mut csprng)
    }

    /// Generates a new RSA key with a custom random-number generator.
    #[instrument(name = "create_rsa_signing_key_custom_rng", skip_all)]
    pub fn new_with_rng<Rng>(rng: &mut Rng) -> Result<Self>
    where
        Rng: CryptoRngCore + ?Sized,
    {
        let private_key = RsaPrivateKey::new(rng, KEY_SIZE).context(CreateKeySnafu)?;
        Ok(Self(rsa::pkcs1v15::SigningKey::new(private_key)))
    }

    #[instrument(name = "create_rsa_signing_key_from_pkcs8_pem", skip_all)]
    pub fn from_pkcs8_pem(input: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(input).context(DeserializeSigningKeySnafu)?;
        Ok(Self(rsa::pkcs1v15::SigningKey::new(private_key)))
    }

    /// Serializes the private half as a PEM-encoded PKCS#8 document.
    pub fn to_pkcs8_pem(&self) -> Result<Zeroizing<String>> {
        self.0
            .to_pkcs8_pem(LineEnding::LF)
            .context(SerializeSigningKeySnafu)
    }

    pub fn signing_key(&self) -> &rsa::pkcs1v15::SigningKey<sha2::Sha256> {
        &self.0
    }

    pub fn verifying_key(&self) -> rsa::pkcs1v15::VerifyingKey<sha2::Sha256> {
        self.0.verifying_key()
    }

    /// The key length in bits.
    pub fn key_size() -> usize {
        KEY_SIZE
    }
}
