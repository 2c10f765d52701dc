//! Resolution of the single current version of a record
//!
//! A read only: no lock is taken, so a version returned here may already be
//! superseded by the time a transition built on it reaches the coordinator.
//! That race surfaces as a conflict at commit time.
use super::error::{AgreementError, LookupError};
use super::ledger::QueryService;
use super::state::VersionedState;

pub async fn find_current(
    query: &dyn QueryService,
    record_type: &str,
    business_key: &str,
) -> Result<VersionedState, AgreementError> {
    let mut unconsumed = query.find_unconsumed(record_type, business_key).await?;

    match unconsumed.len() {
        0 => Err(LookupError::NotFound {
            record_type: record_type.to_string(),
            business_key: business_key.to_string(),
        }
        .into()),
        1 => Ok(unconsumed.remove(0)),
        count => {
            tracing::error!(
                record_type,
                business_key,
                count,
                "Multiple unconsumed versions; ledger is corrupted or racing"
            );
            Err(LookupError::Ambiguous {
                record_type: record_type.to_string(),
                business_key: business_key.to_string(),
                count,
            }
            .into())
        }
    }
}
