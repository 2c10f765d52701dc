//! Stakeholder identities, Ed25519 signing and the identity directory
//!
//! Every signature in the system covers a 32-byte SHA-256 digest of a CBOR
//! encoded payload. Identities are organization names bound to a public key;
//! the directory turns an organization name into a handle that can be asked
//! to co-sign.
use super::protocol::CoSigner;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("public key of {0} is not a valid Ed25519 point")]
    InvalidPublicKey(String),
    #[error("signature by {0} does not verify")]
    InvalidSignature(String),
}

/// A stakeholder: organization name plus its Ed25519 public key.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    #[n(0)]
    pub organization: String,
    #[n(1)]
    pub key: [u8; 32],
}

impl Identity {
    pub fn short_key(&self) -> String {
        hex::encode(&self.key[..4])
    }
    fn verifying_key(&self) -> Result<VerifyingKey, CryptoError> {
        VerifyingKey::from_bytes(&self.key)
            .map_err(|_| CryptoError::InvalidPublicKey(self.organization.clone()))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.organization, self.short_key())
    }
}

/// A signature together with the identity that produced it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PartySignature {
    #[n(0)]
    pub signer: Identity,
    #[n(1)]
    pub bytes: [u8; 64],
}

impl PartySignature {
    pub fn verify(&self, digest: &[u8; 32]) -> Result<(), CryptoError> {
        let vk = self.signer.verifying_key()?;
        let sig = ed25519_dalek::Signature::from_bytes(&self.bytes);
        vk.verify(digest, &sig)
            .map_err(|_| CryptoError::InvalidSignature(self.signer.organization.clone()))
    }
}

/// An identity that holds its own signing key.
#[derive(Clone)]
pub struct Party {
    identity: Identity,
    signing_key: SigningKey,
}

impl Party {
    /// Generate a new party with a random keypair.
    pub fn generate(organization: &str) -> Self {
        Self::from_signing_key(organization, SigningKey::generate(&mut OsRng))
    }
    pub fn from_signing_key(organization: &str, signing_key: SigningKey) -> Self {
        let identity = Identity {
            organization: organization.to_string(),
            key: signing_key.verifying_key().to_bytes(),
        };
        Self {
            identity,
            signing_key,
        }
    }
    pub fn identity(&self) -> &Identity {
        &self.identity
    }
    pub fn sign(&self, digest: &[u8; 32]) -> PartySignature {
        PartySignature {
            signer: self.identity.clone(),
            bytes: self.signing_key.sign(digest).to_bytes(),
        }
    }
}

impl std::fmt::Debug for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Party")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// SHA-256 over CBOR bytes, as raw digest bytes.
pub fn content_digest(encoded: Vec<u8>) -> anyhow::Result<[u8; 32]> {
    let hash = sha256::digest(encoded.as_slice());
    let raw = hex::decode(hash)?;
    raw.try_into()
        .map_err(|raw: Vec<u8>| anyhow::anyhow!("digest has {} bytes, expected 32", raw.len()))
}

/// Something that can be asked to co-sign, reachable under an organization name.
#[derive(Clone)]
pub struct PeerHandle {
    pub identity: Identity,
    pub signer: Arc<dyn CoSigner>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Resolves organization names to peers. Injected into the protocol at drafting time.
pub trait IdentityDirectory: Send + Sync {
    fn resolve(&self, organization: &str) -> Option<PeerHandle>;
}

/// Directory backed by a fixed map, populated at startup.
#[derive(Default, Clone)]
pub struct StaticDirectory {
    peers: HashMap<String, PeerHandle>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn register(&mut self, identity: Identity, signer: Arc<dyn CoSigner>) {
        self.peers.insert(
            identity.organization.clone(),
            PeerHandle { identity, signer },
        );
    }
    pub fn with_peer(mut self, identity: Identity, signer: Arc<dyn CoSigner>) -> Self {
        self.register(identity, signer);
        self
    }
}

impl IdentityDirectory for StaticDirectory {
    fn resolve(&self, organization: &str) -> Option<PeerHandle> {
        self.peers.get(organization).cloned()
    }
}
