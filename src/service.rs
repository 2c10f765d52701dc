//! Service layer API for issuing and updating agreed records
use super::catalog::Catalog;
use super::config::ProtocolConfig;
use super::error::{AgreementError, LookupError};
use super::identity::{Identity, IdentityDirectory, Party};
use super::ledger::{Coordinator, LedgerEntry, QueryService};
use super::protocol::{Committed, Transition};
use super::record_type::RecordType;
use super::resolver;
use super::state::{FieldValue, Fields, VersionedState};
use super::utils;
use super::verifier::TransitionKind;
use std::sync::Arc;

/// Caller input for a brand-new record.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub business_key: String,
    pub participants: Vec<String>, // organization names, in role order
    pub status: Option<String>,    // defaults to the type's initial status
    pub fields: Fields,
}

impl IssueRequest {
    pub fn new(business_key: &str) -> Self {
        Self {
            business_key: business_key.to_string(),
            ..Self::default()
        }
    }
    pub fn add_participant(mut self, organization: &str) -> Self {
        self.participants.push(organization.to_string());
        self
    }
    pub fn set_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
    pub fn set_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
}

/// Caller input for a successor: only what changes.
#[derive(Debug, Clone, Default)]
pub struct Delta {
    pub business_key: Option<String>,
    pub participants: Option<Vec<String>>,
    pub status: Option<String>,
    pub fields: Fields,
    pub removed: Vec<String>,
}

impl Delta {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_status(mut self, status: &str) -> Self {
        self.status = Some(status.to_string());
        self
    }
    pub fn set_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
    pub fn remove_field(mut self, name: &str) -> Self {
        self.removed.push(name.to_string());
        self
    }
    pub fn set_participants(mut self, organizations: &[&str]) -> Self {
        self.participants = Some(organizations.iter().map(|o| o.to_string()).collect());
        self
    }
    pub fn set_business_key(mut self, business_key: &str) -> Self {
        self.business_key = Some(business_key.to_string());
        self
    }
}

pub struct AgreementService {
    party: Party,
    catalog: Arc<Catalog>,
    directory: Arc<dyn IdentityDirectory>,
    coordinator: Arc<dyn Coordinator>,
    query: Arc<dyn QueryService>,
    config: ProtocolConfig,
}

impl AgreementService {
    pub fn new(
        party: Party,
        catalog: Arc<Catalog>,
        directory: Arc<dyn IdentityDirectory>,
        coordinator: Arc<dyn Coordinator>,
        query: Arc<dyn QueryService>,
    ) -> Self {
        Self {
            party,
            catalog,
            directory,
            coordinator,
            query,
            config: ProtocolConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ProtocolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(&self) -> &Identity {
        self.party.identity()
    }

    /// Issue a new record and drive it to commit
    pub async fn issue(
        &self,
        record_type: &str,
        request: IssueRequest,
    ) -> Result<Committed, AgreementError> {
        let mut transition = self.prepare_issue(record_type, request)?;
        self.submit(&mut transition).await
    }

    /// Supersede the current version of a record
    pub async fn update(
        &self,
        record_type: &str,
        business_key: &str,
        delta: Delta,
    ) -> Result<Committed, AgreementError> {
        let mut transition = self.prepare_update(record_type, business_key, delta).await?;
        self.submit(&mut transition).await
    }

    /// Run a type-specific auxiliary update such as `auction-status`
    pub async fn apply(
        &self,
        record_type: &str,
        transition_name: &str,
        business_key: &str,
        delta: Delta,
    ) -> Result<Committed, AgreementError> {
        let mut transition = self
            .prepare_auxiliary(record_type, transition_name, business_key, delta)
            .await?;
        self.submit(&mut transition).await
    }

    /// Draft an issue without running it.
    pub fn prepare_issue(
        &self,
        record_type: &str,
        request: IssueRequest,
    ) -> Result<Transition, AgreementError> {
        let rt = self.record_type(record_type)?;
        validate_business_key(&request.business_key)?;
        if request.participants.is_empty() {
            return Err(AgreementError::InputValidation(
                "at least one participant is required".into(),
            ));
        }

        let participants = self.resolve_participants(&request.participants)?;
        let status = request
            .status
            .unwrap_or_else(|| rt.initial_status.to_string());
        let candidate = VersionedState::new(
            request.business_key,
            self.new_version_id()?,
            participants,
            status,
        )
        .set_fields(request.fields);

        tracing::info!(
            record_type,
            business_key = %candidate.business_key,
            initiator = %self.identity().organization,
            "Issue requested"
        );
        Transition::draft(
            rt,
            TransitionKind::Issue,
            None,
            candidate,
            &self.party,
            self.directory.as_ref(),
        )
    }

    /// Read the current version and draft its successor without running it.
    pub async fn prepare_update(
        &self,
        record_type: &str,
        business_key: &str,
        delta: Delta,
    ) -> Result<Transition, AgreementError> {
        let rt = self.record_type(record_type)?;
        validate_business_key(business_key)?;
        let predecessor = resolver::find_current(self.query.as_ref(), rt.name, business_key).await?;
        let candidate = self.successor(&predecessor, delta)?;

        tracing::info!(
            record_type,
            business_key,
            predecessor = %predecessor.version_id,
            initiator = %self.identity().organization,
            "Update requested"
        );
        Transition::draft(
            rt,
            TransitionKind::Update,
            Some(predecessor),
            candidate,
            &self.party,
            self.directory.as_ref(),
        )
    }

    pub async fn prepare_auxiliary(
        &self,
        record_type: &str,
        transition_name: &str,
        business_key: &str,
        delta: Delta,
    ) -> Result<Transition, AgreementError> {
        let rt = self.record_type(record_type)?;
        validate_business_key(business_key)?;
        let aux = rt.aux(transition_name).ok_or_else(|| {
            AgreementError::InputValidation(format!(
                "{record_type} has no transition named {transition_name}"
            ))
        })?;
        let predecessor = resolver::find_current(self.query.as_ref(), rt.name, business_key).await?;

        if let Some(role) = aux.restricted_to {
            let holder = rt
                .role_index(role)
                .and_then(|index| predecessor.participants.get(index));
            if holder != Some(self.identity()) {
                tracing::warn!(
                    record_type,
                    business_key,
                    transition = transition_name,
                    organization = %self.identity().organization,
                    "Unauthorized auxiliary transition"
                );
                return Err(AgreementError::Authorization {
                    organization: self.identity().organization.clone(),
                    transition: transition_name.to_string(),
                    role: role.to_string(),
                });
            }
        }

        let candidate = self.successor(&predecessor, delta)?;
        Transition::draft(
            rt.clone(),
            TransitionKind::Auxiliary(aux.name.to_string()),
            Some(predecessor),
            candidate,
            &self.party,
            self.directory.as_ref(),
        )
    }

    /// Run a drafted transition through verification, signing and commit.
    pub async fn submit(&self, transition: &mut Transition) -> Result<Committed, AgreementError> {
        transition
            .run(&self.party, self.coordinator.as_ref(), &self.config)
            .await
    }

    pub async fn find_current(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> Result<VersionedState, AgreementError> {
        let rt = self.record_type(record_type)?;
        resolver::find_current(self.query.as_ref(), rt.name, business_key).await
    }

    pub async fn list_all(
        &self,
        record_type: &str,
        status: Option<&str>,
    ) -> Result<Vec<VersionedState>, AgreementError> {
        let rt = self.record_type(record_type)?;
        Ok(self.query.list_all(rt.name, status).await?)
    }

    /// Every version of a record, newest first.
    pub async fn history(
        &self,
        record_type: &str,
        business_key: &str,
    ) -> Result<Vec<LedgerEntry>, AgreementError> {
        let rt = self.record_type(record_type)?;
        Ok(self.query.list_history(rt.name, business_key).await?)
    }

    fn record_type(&self, name: &str) -> Result<Arc<RecordType>, AgreementError> {
        self.catalog
            .get(name)
            .ok_or_else(|| AgreementError::InputValidation(format!("unknown record type {name}")))
    }

    fn new_version_id(&self) -> Result<String, AgreementError> {
        Ok(utils::new_version_id(&self.config.version_prefix)?)
    }

    fn resolve_participants(&self, organizations: &[String]) -> Result<Vec<Identity>, AgreementError> {
        organizations
            .iter()
            .map(|organization| {
                if *organization == self.identity().organization {
                    return Ok(self.identity().clone());
                }
                self.directory
                    .resolve(organization)
                    .map(|peer| peer.identity)
                    .ok_or_else(|| {
                        AgreementError::from(LookupError::UnknownOrganization(organization.clone()))
                    })
            })
            .collect()
    }

    fn successor(
        &self,
        predecessor: &VersionedState,
        delta: Delta,
    ) -> Result<VersionedState, AgreementError> {
        let mut candidate = predecessor.successor(self.new_version_id()?);
        if let Some(business_key) = delta.business_key {
            candidate.business_key = business_key;
        }
        if let Some(participants) = delta.participants {
            candidate.participants = self.resolve_participants(&participants)?;
        }
        if let Some(status) = delta.status {
            candidate.status = status;
        }
        for name in &delta.removed {
            candidate.fields.remove(name);
        }
        candidate.fields.extend(delta.fields);
        Ok(candidate)
    }
}

fn validate_business_key(business_key: &str) -> Result<(), AgreementError> {
    if business_key.trim().is_empty() {
        return Err(AgreementError::InputValidation(
            "business key is required".into(),
        ));
    }
    if business_key.chars().any(char::is_control) {
        return Err(AgreementError::InputValidation(
            "business key cannot contain control characters".into(),
        ));
    }
    Ok(())
}
