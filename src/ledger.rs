//! Ledger collaborators: the commit coordinator and the query service
//!
//! Both are external to the agreement protocol and consumed through traits.
//! `SledLedger` implements the two of them over a single sled database so the
//! protocol can run end to end:
//!
//! - `versions`: version id -> [`LedgerEntry`]
//! - `heads`: record type + business key -> current version id and chain height
//! - `chains`: record type + business key + height -> version id
//!
//! A commit is one multi-tree transaction. The predecessor reference must match
//! the chain head, so a predecessor is consumed at most once and readers never
//! see a consumed predecessor without its successor.
use super::identity::{CryptoError, Identity, PartySignature};
use super::protocol::transition_digest;
use super::state::{StateRef, TimeStamp, VersionedState};
use super::verifier::TransitionKind;
use async_trait::async_trait;
use chrono::Utc;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionResult};
use sled::Transactional;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

const SEP: u8 = 0x1f;

/// A fully signed transition ready to be admitted.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub record_type: String,
    pub kind: TransitionKind,
    pub predecessor: Option<StateRef>,
    pub successor: VersionedState,
    pub signatures: Vec<PartySignature>,
    /// Everyone whose signature is required: predecessor and successor participants.
    pub participants: Vec<Identity>,
}

impl CommitRequest {
    pub fn digest(&self) -> anyhow::Result<[u8; 32]> {
        transition_digest(
            &self.record_type,
            &self.kind,
            self.predecessor.as_ref(),
            &self.successor,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitReceipt {
    pub version_id: String,
    pub height: u64,
    pub committed_at: TimeStamp<Utc>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    #[error("{business_key} has moved on; predecessor {predecessor:?} is no longer current")]
    Conflict {
        business_key: String,
        predecessor: Option<String>,
    },
    #[error("missing signatures from {}", .0.join(", "))]
    MissingSignatures(Vec<String>),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("malformed commit: {0}")]
    Malformed(String),
    #[error("ledger storage failure: {0}")]
    Storage(String),
}

/// Stored form of one version and its place in the chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    #[n(0)]
    pub record_type: String,
    #[n(1)]
    pub state: VersionedState,
    #[n(2)]
    pub predecessor: Option<String>,
    #[n(3)]
    pub consumed_by: Option<String>,
    #[n(4)]
    pub signatures: Vec<PartySignature>,
    #[n(5)]
    pub committed_at: TimeStamp<Utc>,
    #[n(6)]
    pub height: u64,
}

impl LedgerEntry {
    pub fn is_consumed(&self) -> bool {
        self.consumed_by.is_some()
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
struct Head {
    #[n(0)]
    version_id: String,
    #[n(1)]
    height: u64,
}

/// Atomic, at-most-once consumption of predecessor references.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn commit(&self, request: CommitRequest) -> Result<CommitReceipt, CommitError>;
}

/// Read side fed by commits.
#[async_trait]
pub trait QueryService: Send + Sync {
    /// Every unconsumed version for the key. More than one means a corrupted ledger.
    async fn find_unconsumed(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<VersionedState>>;
    /// Current versions ordered by business key, optionally filtered by status.
    async fn list_all(
        &self,
        record_type: &str,
        status: Option<&str>,
    ) -> anyhow::Result<Vec<VersionedState>>;
    /// Every version of the key, consumed ones included, newest first.
    async fn list_history(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<LedgerEntry>>;
}

#[derive(Clone)]
pub struct SledLedger {
    instance: Arc<sled::Db>,
    versions: sled::Tree,
    heads: sled::Tree,
    chains: sled::Tree,
}

impl SledLedger {
    pub fn new(instance: Arc<sled::Db>) -> anyhow::Result<Self> {
        let versions = instance.open_tree("versions")?;
        let heads = instance.open_tree("heads")?;
        let chains = instance.open_tree("chains")?;
        Ok(Self {
            instance,
            versions,
            heads,
            chains,
        })
    }

    pub fn flush(&self) -> anyhow::Result<()> {
        self.instance.flush()?;
        Ok(())
    }

    /// Look up a single version, consumed or not.
    pub fn entry(&self, version_id: &str) -> anyhow::Result<Option<LedgerEntry>> {
        match self.versions.get(version_id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn commit_blocking(&self, request: &CommitRequest) -> Result<CommitReceipt, CommitError> {
        let business_key = request.successor.business_key.clone();
        if let Some(pred) = &request.predecessor {
            if pred.business_key != business_key {
                return Err(CommitError::Malformed(format!(
                    "predecessor belongs to {} but successor to {}",
                    pred.business_key, business_key
                )));
            }
        }
        verify_signatures(request)?;

        let head_key = head_key(&request.record_type, &business_key);
        let prefix = chain_prefix(&request.record_type, &business_key);
        let successor_id = request.successor.version_id.clone();
        let committed_at = TimeStamp::new();
        let conflict = || CommitError::Conflict {
            business_key: business_key.clone(),
            predecessor: request.predecessor.as_ref().map(|p| p.version_id.clone()),
        };

        let result: TransactionResult<CommitReceipt, CommitError> =
            (&self.versions, &self.heads, &self.chains).transaction(|(versions, heads, chains)| {
                let head = match heads.get(head_key.as_slice())? {
                    Some(raw) => Some(decode::<Head>(&raw).map_err(ConflictableTransactionError::Abort)?),
                    None => None,
                };

                let height = match (&request.predecessor, &head) {
                    (None, None) => 0,
                    (Some(pred), Some(head)) if head.version_id == pred.version_id => head.height + 1,
                    _ => return Err(ConflictableTransactionError::Abort(conflict())),
                };

                if versions.get(successor_id.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(conflict()));
                }

                if let Some(pred) = &request.predecessor {
                    let Some(raw) = versions.get(pred.version_id.as_bytes())? else {
                        return Err(ConflictableTransactionError::Abort(conflict()));
                    };
                    let mut consumed: LedgerEntry =
                        decode(&raw).map_err(ConflictableTransactionError::Abort)?;
                    if consumed.is_consumed() {
                        return Err(ConflictableTransactionError::Abort(conflict()));
                    }
                    // whoever held the predecessor must agree, even if the successor drops them
                    let missing = unsigned(&consumed.state.participants, &request.signatures);
                    if !missing.is_empty() {
                        return Err(ConflictableTransactionError::Abort(
                            CommitError::MissingSignatures(missing),
                        ));
                    }
                    consumed.consumed_by = Some(successor_id.clone());
                    versions.insert(
                        pred.version_id.as_bytes(),
                        encode(&consumed).map_err(ConflictableTransactionError::Abort)?,
                    )?;
                }

                let entry = LedgerEntry {
                    record_type: request.record_type.clone(),
                    state: request.successor.clone(),
                    predecessor: request.predecessor.as_ref().map(|p| p.version_id.clone()),
                    consumed_by: None,
                    signatures: request.signatures.clone(),
                    committed_at: committed_at.clone(),
                    height,
                };
                versions.insert(
                    successor_id.as_bytes(),
                    encode(&entry).map_err(ConflictableTransactionError::Abort)?,
                )?;

                let mut chain_key = prefix.clone();
                chain_key.extend_from_slice(&height.to_be_bytes());
                chains.insert(chain_key, successor_id.as_bytes())?;

                let head = Head {
                    version_id: successor_id.clone(),
                    height,
                };
                heads.insert(
                    head_key.as_slice(),
                    encode(&head).map_err(ConflictableTransactionError::Abort)?,
                )?;

                Ok(CommitReceipt {
                    version_id: successor_id.clone(),
                    height,
                    committed_at: committed_at.clone(),
                })
            });

        match result {
            Ok(receipt) => {
                tracing::info!(
                    record_type = %request.record_type,
                    business_key = %business_key,
                    version_id = %receipt.version_id,
                    height = receipt.height,
                    "Transition committed"
                );
                Ok(receipt)
            }
            Err(TransactionError::Abort(err)) => {
                tracing::warn!(
                    record_type = %request.record_type,
                    business_key = %business_key,
                    error = %err,
                    "Commit rejected"
                );
                Err(err)
            }
            Err(TransactionError::Storage(err)) => Err(CommitError::Storage(err.to_string())),
        }
    }

    pub fn find_unconsumed_blocking(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<VersionedState>> {
        Ok(self
            .chain_entries(record_type, business_key)?
            .into_iter()
            .filter(|entry| !entry.is_consumed())
            .map(|entry| entry.state)
            .collect())
    }

    pub fn list_all_blocking(
        &self,
        record_type: &str,
        status: Option<&str>,
    ) -> anyhow::Result<Vec<VersionedState>> {
        let mut prefix = record_type.as_bytes().to_vec();
        prefix.push(SEP);

        let mut states = vec![];
        for item in self.heads.scan_prefix(&prefix) {
            let (_, raw) = item?;
            let head: Head = minicbor::decode(&raw)?;
            let entry = self.entry(&head.version_id)?.ok_or_else(|| {
                anyhow::anyhow!("head points at missing version {}", head.version_id)
            })?;
            if status.is_none_or(|s| entry.state.status == s) {
                states.push(entry.state);
            }
        }
        Ok(states)
    }

    pub fn list_history_blocking(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<LedgerEntry>> {
        let mut entries = self.chain_entries(record_type, business_key)?;
        entries.reverse();
        Ok(entries)
    }

    // chain entries in commit order, oldest first
    fn chain_entries(&self, record_type: &str, business_key: &str) -> anyhow::Result<Vec<LedgerEntry>> {
        let mut entries = vec![];
        for item in self.chains.scan_prefix(chain_prefix(record_type, business_key)) {
            let (_, version_id) = item?;
            let version_id = std::str::from_utf8(&version_id)?;
            let entry = self
                .entry(version_id)?
                .ok_or_else(|| anyhow::anyhow!("chain points at missing version {version_id}"))?;
            entries.push(entry);
        }
        Ok(entries)
    }
}

// sled calls block, so the async side hands them to tokio's blocking pool
#[async_trait]
impl Coordinator for SledLedger {
    async fn commit(&self, request: CommitRequest) -> Result<CommitReceipt, CommitError> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.commit_blocking(&request))
            .await
            .map_err(|e| CommitError::Storage(format!("commit task failed: {e}")))?
    }
}

#[async_trait]
impl QueryService for SledLedger {
    async fn find_unconsumed(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<VersionedState>> {
        let (ledger, record_type, business_key) =
            (self.clone(), record_type.to_string(), business_key.to_string());
        tokio::task::spawn_blocking(move || ledger.find_unconsumed_blocking(&record_type, &business_key))
            .await?
    }

    async fn list_all(
        &self,
        record_type: &str,
        status: Option<&str>,
    ) -> anyhow::Result<Vec<VersionedState>> {
        let (ledger, record_type, status) =
            (self.clone(), record_type.to_string(), status.map(str::to_string));
        tokio::task::spawn_blocking(move || ledger.list_all_blocking(&record_type, status.as_deref()))
            .await?
    }

    async fn list_history(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> anyhow::Result<Vec<LedgerEntry>> {
        let (ledger, record_type, business_key) =
            (self.clone(), record_type.to_string(), business_key.to_string());
        tokio::task::spawn_blocking(move || ledger.list_history_blocking(&record_type, &business_key))
            .await?
    }
}

/// Every participant must have a valid signature over the transition digest.
fn verify_signatures(request: &CommitRequest) -> Result<(), CommitError> {
    let digest = request
        .digest()
        .map_err(|e| CommitError::Malformed(e.to_string()))?;

    for signature in &request.signatures {
        signature.verify(&digest)?;
    }

    let required: Vec<Identity> = request
        .participants
        .iter()
        .chain(request.successor.participants.iter())
        .cloned()
        .collect();
    let missing = unsigned(&required, &request.signatures);

    if missing.is_empty() {
        Ok(())
    } else {
        Err(CommitError::MissingSignatures(missing))
    }
}

/// Organizations among `participants` with no signature in the set, sorted and deduplicated.
fn unsigned(participants: &[Identity], signatures: &[PartySignature]) -> Vec<String> {
    let signed: HashSet<&Identity> = signatures.iter().map(|s| &s.signer).collect();
    participants
        .iter()
        .filter(|p| !signed.contains(p))
        .map(|p| p.organization.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn head_key(record_type: &str, business_key: &str) -> Vec<u8> {
    let mut key = record_type.as_bytes().to_vec();
    key.push(SEP);
    key.extend_from_slice(business_key.as_bytes());
    key
}

fn chain_prefix(record_type: &str, business_key: &str) -> Vec<u8> {
    let mut key = head_key(record_type, business_key);
    key.push(SEP);
    key
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, CommitError> {
    minicbor::to_vec(value).map_err(|e| CommitError::Storage(e.to_string()))
}

fn decode<'b, T: minicbor::Decode<'b, ()>>(raw: &'b [u8]) -> Result<T, CommitError> {
    minicbor::decode(raw).map_err(|e| CommitError::Storage(e.to_string()))
}
