//! Detached signature creation/verification for repository metadata.
//!
//! Grounded in the teacher's `openssl::sign::{Signer, Verifier}` use in
//! `src/backup/data_blob.rs` (`ChecksumWriter`/`ChecksumReader` sign and
//! verify HMAC/RSA tags over blob contents the same way). Real upstream
//! GPG armor (OpenPGP packet framing) is not reimplemented here — keys
//! are PEM-encoded RSA keys and signatures are raw PKCS#1v1.5-over-SHA256
//! blobs written next to the armored-looking `.asc`/`.gpg` filenames the
//! families expect. This is recorded as a simplification in DESIGN.md:
//! full OpenPGP parsing is disproportionate to the engine's scope, and
//! spec §1 excludes "recomputing upstream package signatures" — metadata
//! signing only needs to produce *a* verifiable signature with a
//! caller-supplied key, not interoperate with the GPG keyring format.

use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private, Public};
use openssl::sign::{Signer, Verifier};

use crate::error::{ChantalError, Result};

pub struct SigningKey {
    pkey: PKey<Private>,
}

impl SigningKey {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::private_key_from_pem(pem)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        Ok(Self { pkey })
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut signer = Signer::new(MessageDigest::sha256(), &self.pkey)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        signer
            .update(data)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        signer
            .sign_to_vec()
            .map_err(|err| ChantalError::Signature(err.to_string()))
    }
}

pub struct VerifyKey {
    pkey: PKey<Public>,
}

impl VerifyKey {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let pkey = PKey::public_key_from_pem(pem)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        Ok(Self { pkey })
    }

    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<bool> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), &self.pkey)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        verifier
            .update(data)
            .map_err(|err| ChantalError::Signature(err.to_string()))?;
        verifier
            .verify(signature)
            .map_err(|err| ChantalError::Signature(err.to_string()))
    }
}

/// Verify `data` against `signature` using the first key in `keys` that
/// validates it. Used by the Sync Engine's per-family signature step
/// (spec §4.5 step 6) against the repository's configured `gpg_keys`.
pub fn verify_any(data: &[u8], signature: &[u8], keys: &[VerifyKey]) -> Result<()> {
    for key in keys {
        if key.verify(data, signature)? {
            return Ok(());
        }
    }
    Err(ChantalError::Signature(
        "no configured key validated the signature".into(),
    ))
}
