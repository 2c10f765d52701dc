pub mod catalog;
pub mod config;
pub mod error;
pub mod identity;
pub mod ledger;
pub mod protocol;
pub mod record_type;
pub mod resolver;
pub mod service;
pub mod state;
pub mod utils;
pub mod verifier;

pub use error::{AgreementError, ContractViolation, ErrorKind, LookupError, Violation};
pub use service::{AgreementService, Delta, IssueRequest};
