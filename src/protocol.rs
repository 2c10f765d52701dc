//! Signature collection protocol
//!
//! One [`Transition`] exists per attempted Issue, Update or auxiliary update.
//! It moves through explicit phases:
//!
//! ```text
//! Drafting -> LocalVerify -> SelfSign -> Collect -> Finalize -> Committed
//!                  |                         |          |
//!                  v                         v          v
//!            RejectedLocal                Aborted    Aborted
//! ```
//!
//! Nothing reaches a peer before local verification passes, and nothing reaches
//! the coordinator before every participant has signed. A single rejection or
//! an expired session aborts the whole transition; the collected signatures are
//! dropped. Retrying after `Aborted` means drafting again from a fresh read.
//!
//! Only co-signer sessions carry a deadline. Finalize waits for the
//! coordinator to commit or reject, so `Aborted` always means nothing landed.
use super::catalog::Catalog;
use super::config::ProtocolConfig;
use super::error::{AgreementError, ContractViolation, LookupError, Violation};
use super::identity::{Identity, IdentityDirectory, Party, PartySignature, PeerHandle, content_digest};
use super::ledger::{CommitError, CommitReceipt, CommitRequest, Coordinator, QueryService};
use super::record_type::RecordType;
use super::resolver::find_current;
use super::state::{StateRef, VersionedState};
use super::verifier::{TransitionKind, verify_transition};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Drafting,
    LocalVerify,
    SelfSign,
    Collect,
    Finalize,
    Committed,
    RejectedLocal,
    Aborted,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Committed | Phase::RejectedLocal | Phase::Aborted)
    }
}

/// Digest every party signs: record type, kind, predecessor ref and candidate.
pub fn transition_digest(
    record_type: &str,
    kind: &TransitionKind,
    predecessor: Option<&StateRef>,
    candidate: &VersionedState,
) -> anyhow::Result<[u8; 32]> {
    let mut encoder = minicbor::Encoder::new(Vec::new());
    encoder
        .array(4)?
        .str(record_type)?
        .encode(kind)?
        .encode(predecessor)?
        .encode(candidate)?;
    content_digest(encoder.into_writer())
}

/// The draft circulated to co-signers.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub record_type: String,
    pub kind: TransitionKind,
    pub predecessor: Option<VersionedState>,
    pub candidate: VersionedState,
    pub initiator: Identity,
}

impl Proposal {
    pub fn predecessor_ref(&self) -> Option<StateRef> {
        self.predecessor.as_ref().map(VersionedState::state_ref)
    }
    /// Predecessor participants followed by any the candidate adds.
    ///
    /// A participant the candidate drops still has to sign it away.
    pub fn required_signers(&self) -> Vec<Identity> {
        let mut required: Vec<Identity> = vec![];
        let previous = self.predecessor.iter().flat_map(|p| p.participants.iter());
        for participant in previous.chain(&self.candidate.participants) {
            if !required.contains(participant) {
                required.push(participant.clone());
            }
        }
        required
    }
    pub fn digest(&self) -> anyhow::Result<[u8; 32]> {
        transition_digest(
            &self.record_type,
            &self.kind,
            self.predecessor_ref().as_ref(),
            &self.candidate,
        )
    }
}

#[derive(Debug, Clone)]
pub struct SignedProposal {
    pub proposal: Proposal,
    pub signatures: Vec<PartySignature>,
}

/// A co-signer's refusal, with the predicates it found violated if any.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct Rejection {
    pub reason: String,
    pub violations: Vec<Violation>,
}

impl Rejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            violations: vec![],
        }
    }
}

impl From<ContractViolation> for Rejection {
    fn from(value: ContractViolation) -> Self {
        Self {
            reason: value.to_string(),
            violations: value.0,
        }
    }
}

/// A participant asked to co-sign a draft.
#[async_trait]
pub trait CoSigner: Send + Sync {
    async fn review(&self, draft: &SignedProposal) -> Result<PartySignature, Rejection>;
}

/// Co-signer that re-runs contract verification with its own key.
///
/// When given a query service it is stricter than the initiator and also
/// refuses drafts whose predecessor is no longer the current version.
pub struct LocalCoSigner {
    party: Party,
    catalog: Arc<Catalog>,
    ledger: Option<Arc<dyn QueryService>>,
}

impl LocalCoSigner {
    pub fn new(party: Party, catalog: Arc<Catalog>) -> Self {
        Self {
            party,
            catalog,
            ledger: None,
        }
    }
    pub fn with_ledger(mut self, ledger: Arc<dyn QueryService>) -> Self {
        self.ledger = Some(ledger);
        self
    }
    pub fn identity(&self) -> &Identity {
        self.party.identity()
    }

    async fn check_current(&self, proposal: &Proposal) -> Result<(), Rejection> {
        let Some(ledger) = &self.ledger else {
            return Ok(());
        };
        let key = &proposal.candidate.business_key;

        match &proposal.predecessor {
            None => {
                let live = ledger
                    .find_unconsumed(&proposal.record_type, key)
                    .await
                    .map_err(|e| Rejection::new(e.to_string()))?;
                if !live.is_empty() {
                    return Err(Rejection::new(format!("{key} has already been issued")));
                }
            }
            Some(predecessor) => {
                let current = find_current(ledger.as_ref(), &proposal.record_type, key)
                    .await
                    .map_err(|e| Rejection::new(e.to_string()))?;
                if current != *predecessor {
                    return Err(Rejection::new(format!(
                        "{} is not the current version of {key}",
                        predecessor.version_id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CoSigner for LocalCoSigner {
    async fn review(&self, draft: &SignedProposal) -> Result<PartySignature, Rejection> {
        let proposal = &draft.proposal;
        let me = self.party.identity();
        let required = proposal.required_signers();

        if !required.contains(me) {
            return Err(Rejection::new(format!(
                "{} is not a participant",
                me.organization
            )));
        }
        let record_type = self
            .catalog
            .get(&proposal.record_type)
            .ok_or_else(|| Rejection::new(format!("unknown record type {}", proposal.record_type)))?;

        let digest = proposal.digest().map_err(|e| Rejection::new(e.to_string()))?;
        let initiator_signed = draft
            .signatures
            .iter()
            .any(|s| s.signer == proposal.initiator && s.verify(&digest).is_ok());
        if !initiator_signed {
            return Err(Rejection::new("draft is not signed by its initiator"));
        }

        verify_transition(
            &record_type,
            &proposal.kind,
            proposal.predecessor.as_ref(),
            &proposal.candidate,
            &required,
        )?;
        self.check_current(proposal).await?;

        tracing::debug!(
            peer = %me.organization,
            business_key = %proposal.candidate.business_key,
            "Co-signing draft"
        );
        Ok(self.party.sign(&digest))
    }
}

/// Outcome of a committed transition.
#[derive(Debug, Clone)]
pub struct Committed {
    pub record_type: String,
    pub predecessor: Option<StateRef>,
    pub state: VersionedState,
    pub signatures: Vec<PartySignature>,
    pub receipt: CommitReceipt,
}

impl Committed {
    pub fn version_id(&self) -> &str {
        &self.state.version_id
    }
}

/// One protocol instance.
pub struct Transition {
    phase: Phase,
    trail: Vec<Phase>,
    record_type: Arc<RecordType>,
    proposal: Proposal,
    co_signers: Vec<PeerHandle>,
    signatures: Vec<PartySignature>,
}

impl Transition {
    /// Drafting: resolves every other required signer through the directory.
    pub fn draft(
        record_type: Arc<RecordType>,
        kind: TransitionKind,
        predecessor: Option<VersionedState>,
        candidate: VersionedState,
        initiator: &Party,
        directory: &dyn IdentityDirectory,
    ) -> Result<Self, AgreementError> {
        let me = initiator.identity();
        let holds_predecessor = predecessor
            .as_ref()
            .is_none_or(|p| p.participants.contains(me));
        if !candidate.participants.contains(me) || !holds_predecessor {
            return Err(AgreementError::InputValidation(format!(
                "{} must be a participant to propose a transition",
                me.organization
            )));
        }

        let proposal = Proposal {
            record_type: record_type.name.to_string(),
            kind,
            predecessor,
            candidate,
            initiator: me.clone(),
        };

        let mut co_signers = vec![];
        for participant in proposal.required_signers().iter().filter(|p| *p != me) {
            let peer = directory
                .resolve(&participant.organization)
                .ok_or_else(|| LookupError::UnknownOrganization(participant.organization.clone()))?;
            if peer.identity != *participant {
                return Err(AgreementError::InputValidation(format!(
                    "directory key for {} does not match the participant",
                    participant.organization
                )));
            }
            if !co_signers.iter().any(|p: &PeerHandle| p.identity == peer.identity) {
                co_signers.push(peer);
            }
        }

        tracing::debug!(
            record_type = %proposal.record_type,
            business_key = %proposal.candidate.business_key,
            kind = %proposal.kind,
            co_signers = co_signers.len(),
            "Drafted transition"
        );

        Ok(Self {
            phase: Phase::Drafting,
            trail: vec![Phase::Drafting],
            record_type,
            proposal,
            co_signers,
            signatures: vec![],
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }
    /// Every phase entered so far, in order.
    pub fn trail(&self) -> &[Phase] {
        &self.trail
    }
    pub fn proposal(&self) -> &Proposal {
        &self.proposal
    }
    /// Signatures held right now; empty once the transition is aborted.
    pub fn signatures(&self) -> &[PartySignature] {
        &self.signatures
    }

    /// Drives the transition from local verification to a terminal phase.
    pub async fn run(
        &mut self,
        initiator: &Party,
        coordinator: &dyn Coordinator,
        config: &ProtocolConfig,
    ) -> Result<Committed, AgreementError> {
        if self.phase != Phase::Drafting || self.proposal.initiator != *initiator.identity() {
            return Err(AgreementError::InputValidation(
                "transition can only be run once, by its initiator".into(),
            ));
        }

        self.enter(Phase::LocalVerify);
        let required: Vec<Identity> = std::iter::once(initiator.identity().clone())
            .chain(self.co_signers.iter().map(|p| p.identity.clone()))
            .collect();
        if let Err(violation) = verify_transition(
            &self.record_type,
            &self.proposal.kind,
            self.proposal.predecessor.as_ref(),
            &self.proposal.candidate,
            &required,
        ) {
            self.enter(Phase::RejectedLocal);
            tracing::warn!(
                business_key = %self.proposal.candidate.business_key,
                violations = ?violation.predicates(),
                "Draft rejected locally"
            );
            return Err(violation.into());
        }

        self.enter(Phase::SelfSign);
        let digest = match self.proposal.digest() {
            Ok(digest) => digest,
            Err(e) => return Err(self.abort(e.into())),
        };
        self.signatures = vec![initiator.sign(&digest)];

        self.enter(Phase::Collect);
        let draft = Arc::new(SignedProposal {
            proposal: self.proposal.clone(),
            signatures: self.signatures.clone(),
        });
        match collect(&self.co_signers, draft, digest, config.session_timeout).await {
            Ok(collected) => self.signatures.extend(collected),
            Err(err) => return Err(self.abort(err)),
        }

        self.enter(Phase::Finalize);
        let request = CommitRequest {
            record_type: self.proposal.record_type.clone(),
            kind: self.proposal.kind.clone(),
            predecessor: self.proposal.predecessor_ref(),
            successor: self.proposal.candidate.clone(),
            signatures: self.signatures.clone(),
            participants: self.proposal.required_signers(),
        };
        // no deadline here: giving up locally cannot undo a commit the coordinator made
        let receipt = match coordinator.commit(request).await {
            Ok(receipt) => receipt,
            Err(err) => {
                let err = self.commit_failure(err);
                return Err(self.abort(err));
            }
        };

        self.enter(Phase::Committed);
        Ok(Committed {
            record_type: self.proposal.record_type.clone(),
            predecessor: self.proposal.predecessor_ref(),
            state: self.proposal.candidate.clone(),
            signatures: self.signatures.clone(),
            receipt,
        })
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(
            business_key = %self.proposal.candidate.business_key,
            kind = %self.proposal.kind,
            from = ?self.phase,
            to = ?phase,
            "Transition phase"
        );
        self.phase = phase;
        self.trail.push(phase);
    }

    fn abort(&mut self, err: AgreementError) -> AgreementError {
        self.signatures.clear();
        self.enter(Phase::Aborted);
        tracing::warn!(
            business_key = %self.proposal.candidate.business_key,
            kind = %self.proposal.kind,
            error = %err,
            "Transition aborted"
        );
        err
    }

    fn commit_failure(&self, err: CommitError) -> AgreementError {
        match err {
            CommitError::Conflict {
                business_key,
                predecessor,
            } => AgreementError::Conflict {
                business_key,
                predecessor,
            },
            CommitError::MissingSignatures(missing) => ContractViolation(vec![Violation::new(
                "signers.cover_participants",
                format!("every participant must sign; missing {}.", missing.join(", ")),
            )])
            .into(),
            CommitError::Crypto(e) => AgreementError::PeerRejection {
                peer: "coordinator".into(),
                reason: e.to_string(),
            },
            CommitError::Malformed(reason) => AgreementError::InputValidation(reason),
            CommitError::Storage(reason) => AgreementError::Internal(anyhow::anyhow!(reason)),
        }
    }
}

/// Fans the signed draft out, one session per co-signer, and fans the answers back in.
async fn collect(
    co_signers: &[PeerHandle],
    draft: Arc<SignedProposal>,
    digest: [u8; 32],
    budget: Duration,
) -> Result<Vec<PartySignature>, AgreementError> {
    let mut sessions = JoinSet::new();
    for peer in co_signers {
        let peer = peer.clone();
        let draft = draft.clone();
        sessions.spawn(async move {
            let response = tokio::time::timeout(budget, peer.signer.review(&draft)).await;
            (peer.identity, response)
        });
    }

    // returning early drops the set, which cancels the remaining sessions
    let mut signatures = Vec::with_capacity(co_signers.len());
    while let Some(joined) = sessions.join_next().await {
        let (peer, response) =
            joined.map_err(|e| anyhow::anyhow!("co-signer session failed: {e}"))?;
        match response {
            Err(_) => {
                return Err(AgreementError::Timeout {
                    peer: peer.organization,
                    millis: budget.as_millis(),
                });
            }
            Ok(Err(rejection)) => {
                return Err(AgreementError::PeerRejection {
                    peer: peer.organization,
                    reason: rejection.reason,
                });
            }
            Ok(Ok(signature)) => {
                if signature.signer != peer || signature.verify(&digest).is_err() {
                    return Err(AgreementError::PeerRejection {
                        peer: peer.organization,
                        reason: "returned a signature that does not verify".into(),
                    });
                }
                signatures.push(signature);
            }
        }
    }

    signatures.sort_by(|a, b| a.signer.cmp(&b.signer));
    Ok(signatures)
}
