//! Error taxonomy for transitions.
use std::fmt;

/// One failed contract predicate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, minicbor::Encode, minicbor::Decode)]
pub struct Violation {
    #[n(0)]
    pub predicate: String, // stable dotted name, e.g. `quantity.positive`
    #[n(1)]
    pub message: String,
}

impl Violation {
    pub fn new(predicate: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.predicate, self.message)
    }
}

/// Every predicate the verifier found violated, in evaluation order.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("contract violated: {}", join_messages(.0))]
pub struct ContractViolation(pub Vec<Violation>);

impl ContractViolation {
    pub fn violations(&self) -> &[Violation] {
        &self.0
    }
    pub fn predicates(&self) -> Vec<&str> {
        self.0.iter().map(|v| v.predicate.as_str()).collect()
    }
    pub fn contains(&self, predicate: &str) -> bool {
        self.0.iter().any(|v| v.predicate == predicate)
    }
    pub fn has_message(&self, message: &str) -> bool {
        self.0.iter().any(|v| v.message == message)
    }
}

fn join_messages(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("no current {record_type} found for business key {business_key}")]
    NotFound {
        record_type: String,
        business_key: String,
    },
    #[error("{count} unconsumed {record_type} versions found for business key {business_key}")]
    Ambiguous {
        record_type: String,
        business_key: String,
        count: usize,
    },
    #[error("organization {0} could not be resolved")]
    UnknownOrganization(String),
}

#[derive(thiserror::Error, Debug)]
pub enum AgreementError {
    #[error("invalid request: {0}")]
    InputValidation(String),
    #[error(transparent)]
    ContractViolation(#[from] ContractViolation),
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error("{organization} may not perform {transition}; it is reserved for the {role}")]
    Authorization {
        organization: String,
        transition: String,
        role: String,
    },
    #[error("{business_key} was already superseded by another committed transition")]
    Conflict {
        business_key: String,
        predecessor: Option<String>,
    },
    #[error("{peer} declined to sign: {reason}")]
    PeerRejection { peer: String, reason: String },
    #[error("no response from {peer} within {millis}ms")]
    Timeout { peer: String, millis: u128 },
    #[error("internal fault: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputValidation,
    ContractViolation,
    Lookup,
    Authorization,
    Conflict,
    PeerRejection,
    Timeout,
    Internal,
}

impl AgreementError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgreementError::InputValidation(_) => ErrorKind::InputValidation,
            AgreementError::ContractViolation(_) => ErrorKind::ContractViolation,
            AgreementError::Lookup(_) => ErrorKind::Lookup,
            AgreementError::Authorization { .. } => ErrorKind::Authorization,
            AgreementError::Conflict { .. } => ErrorKind::Conflict,
            AgreementError::PeerRejection { .. } => ErrorKind::PeerRejection,
            AgreementError::Timeout { .. } => ErrorKind::Timeout,
            AgreementError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// HTTP-equivalent status for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            AgreementError::InputValidation(_) => 400,
            AgreementError::Authorization { .. } => 403,
            AgreementError::Lookup(LookupError::Ambiguous { .. }) => 500,
            AgreementError::Lookup(_) => 404,
            AgreementError::Conflict { .. } => 409,
            AgreementError::ContractViolation(_) | AgreementError::PeerRejection { .. } => 422,
            AgreementError::Timeout { .. } => 504,
            AgreementError::Internal(_) => 500,
        }
    }

    pub fn violation(&self) -> Option<&ContractViolation> {
        match self {
            AgreementError::ContractViolation(v) => Some(v),
            _ => None,
        }
    }
}
