#![allow(dead_code)]

use async_trait::async_trait;
use state_agreement::{
    AgreementService,
    catalog::Catalog,
    config::ProtocolConfig,
    identity::{Identity, Party, PartySignature, StaticDirectory},
    ledger::{CommitError, CommitReceipt, CommitRequest, Coordinator, SledLedger},
    protocol::{CoSigner, LocalCoSigner, Rejection, SignedProposal},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// A set of organizations sharing one ledger, each able to co-sign.
pub struct Network {
    _dir: TempDir,
    pub ledger: Arc<SledLedger>,
    pub catalog: Arc<Catalog>,
    pub directory: StaticDirectory,
    pub parties: HashMap<String, Party>,
    pub config: ProtocolConfig,
}

impl Network {
    pub fn new(organizations: &[&str]) -> anyhow::Result<Self> {
        // Sled locks its files, so every test gets its own database under a temp dir.
        let dir = tempdir()?;
        let db = Arc::new(sled::open(dir.path().join("ledger.db"))?);
        let ledger = Arc::new(SledLedger::new(db)?);
        let catalog = Arc::new(Catalog::builtin());

        let mut directory = StaticDirectory::new();
        let mut parties = HashMap::new();
        for organization in organizations {
            let party = Party::generate(organization);
            let signer = LocalCoSigner::new(party.clone(), catalog.clone());
            directory.register(party.identity().clone(), Arc::new(signer));
            parties.insert(organization.to_string(), party);
        }

        Ok(Self {
            _dir: dir,
            ledger,
            catalog,
            directory,
            parties,
            config: ProtocolConfig::default().set_session_timeout(Duration::from_millis(200)),
        })
    }

    pub fn party(&self, organization: &str) -> &Party {
        &self.parties[organization]
    }

    pub fn identity(&self, organization: &str) -> Identity {
        self.party(organization).identity().clone()
    }

    /// Swap how an organization answers co-signing requests.
    pub fn set_signer(&mut self, organization: &str, signer: Arc<dyn CoSigner>) {
        let identity = self.identity(organization);
        self.directory.register(identity, signer);
    }

    /// Make an organization re-check drafts against the ledger before signing.
    pub fn use_strict_signer(&mut self, organization: &str) {
        let signer = LocalCoSigner::new(self.party(organization).clone(), self.catalog.clone())
            .with_ledger(self.ledger.clone());
        self.set_signer(organization, Arc::new(signer));
    }

    pub fn service(&self, organization: &str) -> AgreementService {
        self.service_with_coordinator(organization, self.ledger.clone())
    }

    /// A service whose commits go through `coordinator` while reads still hit the ledger.
    pub fn service_with_coordinator(
        &self,
        organization: &str,
        coordinator: Arc<dyn Coordinator>,
    ) -> AgreementService {
        AgreementService::new(
            self.party(organization).clone(),
            self.catalog.clone(),
            Arc::new(self.directory.clone()),
            coordinator,
            self.ledger.clone(),
        )
        .with_config(self.config.clone())
    }
}

/// Declines every draft.
pub struct RefusingCoSigner;

#[async_trait]
impl CoSigner for RefusingCoSigner {
    async fn review(&self, _: &SignedProposal) -> Result<PartySignature, Rejection> {
        Err(Rejection::new("counterparty does not agree"))
    }
}

/// Never answers within any reasonable session budget.
pub struct SilentCoSigner;

#[async_trait]
impl CoSigner for SilentCoSigner {
    async fn review(&self, _: &SignedProposal) -> Result<PartySignature, Rejection> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Err(Rejection::new("too late"))
    }
}

/// Signs with a key that is not the participant's.
pub struct ImpostorCoSigner(pub Party);

#[async_trait]
impl CoSigner for ImpostorCoSigner {
    async fn review(&self, draft: &SignedProposal) -> Result<PartySignature, Rejection> {
        let digest = draft
            .proposal
            .digest()
            .map_err(|e| Rejection::new(e.to_string()))?;
        Ok(self.0.sign(&digest))
    }
}

/// Commits, then takes far longer than any co-signer session to answer.
pub struct SlowCoordinator {
    pub ledger: Arc<SledLedger>,
    pub delay: Duration,
}

#[async_trait]
impl Coordinator for SlowCoordinator {
    async fn commit(&self, request: CommitRequest) -> Result<CommitReceipt, CommitError> {
        let receipt = self.ledger.commit(request).await;
        tokio::time::sleep(self.delay).await;
        receipt
    }
}

/// Refuses every commit before touching storage.
pub struct BrokenCoordinator;

#[async_trait]
impl Coordinator for BrokenCoordinator {
    async fn commit(&self, _: CommitRequest) -> Result<CommitReceipt, CommitError> {
        Err(CommitError::Storage("disk unavailable".into()))
    }
}
