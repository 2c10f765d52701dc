//! Smoke Screen Unit tests for the agreement components
//!
//! These tests span the crate's building blocks in isolation from the
//! end-to-end scenarios and mostly cover the happy path.

use chrono::{Datelike, Timelike};
use state_agreement::{
    AgreementError, ContractViolation, ErrorKind, LookupError, Violation,
    catalog::{self, Catalog},
    config::ProtocolConfig,
    identity::{Party, content_digest},
    state::{FieldValue, TimeStamp, VersionedState},
    utils::{new_uuid_to_bech32, new_version_id},
};
use std::time::Duration;

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// Encoded ids carry the requested human readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let encoded = new_uuid_to_bech32("ver_").unwrap();
        assert!(encoded.starts_with("ver_1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }

    #[test]
    fn version_ids_do_not_repeat() {
        let ids: Vec<_> = (0..50).map(|_| new_version_id("ver_").unwrap()).collect();
        let mut deduped = ids.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), ids.len());
    }
}

// STATE MODULE TESTS
#[cfg(test)]
mod state_tests {
    use super::*;

    fn sample() -> VersionedState {
        let acme = Party::generate("acme");
        VersionedState::new("BATCH-1", "ver_a", vec![acme.identity().clone()], "open")
            .set_field("quantity", 10.0)
            .set_field("sku", "A-100")
            .set_field("audited", false)
    }

    #[test]
    fn timestamp_components() {
        let ts = TimeStamp::new_with(2025, 6, 30, 14, 5, 9).unwrap().to_datetime_utc();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2025, 6, 30));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 5, 9));
    }

    #[test]
    fn typed_field_accessors() {
        let state = sample();
        assert_eq!(state.number("quantity"), Some(10.0));
        assert_eq!(state.text("sku"), Some("A-100"));
        assert_eq!(state.fields.get("audited"), Some(&FieldValue::Flag(false)));
        // wrong type reads as absent
        assert_eq!(state.number("sku"), None);
        assert_eq!(state.participant_names(), vec!["acme"]);
    }

    #[test]
    fn successor_keeps_history_fields() {
        let state = sample();
        let next = state.successor("ver_b");

        assert_eq!(next.business_key, state.business_key);
        assert_eq!(next.created_at, state.created_at);
        assert_eq!(next.version_id, "ver_b");
        assert!(next.last_updated_at >= state.last_updated_at);
        assert_eq!(next.state_ref().version_id, "ver_b");
    }

    #[test]
    fn state_survives_cbor() {
        let state = sample().set_field("due", TimeStamp::new_with(2026, 1, 1, 0, 0, 0).unwrap());
        let bytes = minicbor::to_vec(&state).unwrap();
        let decoded: VersionedState = minicbor::decode(&bytes).unwrap();
        assert_eq!(decoded, state);
    }
}

// IDENTITY MODULE TESTS
#[cfg(test)]
mod identity_tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        let a = content_digest(b"same bytes".to_vec()).unwrap();
        let b = content_digest(b"same bytes".to_vec()).unwrap();
        let c = content_digest(b"other bytes".to_vec()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn signature_binds_signer_and_digest() {
        let party = Party::generate("acme");
        let digest = content_digest(b"draft".to_vec()).unwrap();
        let signature = party.sign(&digest);

        assert_eq!(&signature.signer, party.identity());
        assert!(signature.verify(&digest).is_ok());

        let other = content_digest(b"tampered".to_vec()).unwrap();
        assert!(signature.verify(&other).is_err());
    }
}

// CATALOG MODULE TESTS
#[cfg(test)]
mod catalog_tests {
    use super::*;

    #[test]
    fn builtin_types_are_registered() {
        let catalog = Catalog::builtin();
        for name in [
            catalog::AGREEMENT,
            catalog::BATCH,
            catalog::ENROLLMENT,
            catalog::EXCHANGE,
            catalog::INVOICE,
            catalog::WALLET,
        ] {
            assert!(catalog.get(name).is_some(), "{name} missing");
        }
        assert!(catalog.get("Unknown").is_none());
    }

    #[test]
    fn custom_types_can_be_added() {
        let catalog = Catalog::new().with(catalog::wallet());
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec![catalog::WALLET]);
    }
}

// ERROR MODULE TESTS
#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_category() {
        let violation = ContractViolation(vec![Violation::new(
            "quantity.positive",
            "quantity must be greater than zero.",
        )]);
        let cases = [
            (AgreementError::InputValidation("bad".into()), 400),
            (AgreementError::from(violation), 422),
            (
                AgreementError::from(LookupError::NotFound {
                    record_type: "Batch".into(),
                    business_key: "B".into(),
                }),
                404,
            ),
            (
                AgreementError::from(LookupError::Ambiguous {
                    record_type: "Batch".into(),
                    business_key: "B".into(),
                    count: 2,
                }),
                500,
            ),
            (
                AgreementError::Conflict {
                    business_key: "B".into(),
                    predecessor: None,
                },
                409,
            ),
            (
                AgreementError::Timeout {
                    peer: "globex".into(),
                    millis: 10,
                },
                504,
            ),
        ];
        for (err, code) in cases {
            assert_eq!(err.status_code(), code, "{err}");
        }
    }

    #[test]
    fn violation_message_reads_as_a_sentence() {
        let err = AgreementError::from(ContractViolation(vec![
            Violation::new("quantity.positive", "quantity must be greater than zero."),
            Violation::new("price.positive", "price must be greater than zero."),
        ]));
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
        assert_eq!(
            err.to_string(),
            "contract violated: quantity must be greater than zero. price must be greater than zero."
        );
    }
}

// CONFIG MODULE TESTS
#[cfg(test)]
mod config_tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let config = ProtocolConfig::default();
        assert_eq!(config.session_timeout, Duration::from_secs(10));
        assert_eq!(config.version_prefix, "ver_");

        let config = ProtocolConfig::new()
            .set_session_timeout(Duration::from_millis(250))
            .set_version_prefix("rev_");
        assert_eq!(config.session_timeout, Duration::from_millis(250));
        assert_eq!(config.version_prefix, "rev_");
    }
}
