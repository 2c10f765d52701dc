//! Property-based tests for version chains in the sled ledger
//!
//! Each case replays a random sequence of commits against one business key.
//! Some extend the chain from its head, others try to supersede an older
//! version. Whatever the sequence, the chain must stay linear: one unconsumed
//! head, every other version consumed exactly once, heights without gaps.

use proptest::prelude::*;
use state_agreement::{
    catalog::BATCH,
    identity::Party,
    ledger::{CommitError, CommitRequest, SledLedger},
    state::VersionedState,
    verifier::TransitionKind,
};
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Debug, Clone)]
enum Step {
    /// Supersede the current head.
    Extend,
    /// Supersede the version committed this many steps back.
    Stale(usize),
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => Just(Step::Extend),
        1 => (1usize..5).prop_map(Step::Stale),
    ]
}

fn signed_request(
    parties: &[Party],
    predecessor: Option<&VersionedState>,
    successor: VersionedState,
) -> CommitRequest {
    let kind = if predecessor.is_some() {
        TransitionKind::Update
    } else {
        TransitionKind::Issue
    };
    let mut request = CommitRequest {
        record_type: BATCH.to_string(),
        kind,
        predecessor: predecessor.map(VersionedState::state_ref),
        participants: successor.participants.clone(),
        successor,
        signatures: vec![],
    };
    let digest = request.digest().unwrap();
    request.signatures = parties.iter().map(|p| p.sign(&digest)).collect();
    request
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn chain_stays_linear(steps in prop::collection::vec(step_strategy(), 1..12)) {
        let dir = tempdir().unwrap();
        let db = Arc::new(sled::open(dir.path().join("chain.db")).unwrap());
        let ledger = SledLedger::new(db).unwrap();
        let parties = vec![Party::generate("acme"), Party::generate("globex")];
        let participants = parties.iter().map(|p| p.identity().clone()).collect();

        let genesis = VersionedState::new("BATCH-1", "ver_0", participants, "open")
            .set_field("quantity", 100.0)
            .set_field("price", 1.0);
        ledger.commit_blocking(&signed_request(&parties, None, genesis.clone())).unwrap();

        // committed versions, oldest first
        let mut committed = vec![genesis];
        for (i, step) in steps.iter().enumerate() {
            let back = match step {
                Step::Extend => 0,
                Step::Stale(n) => *n,
            };
            let Some(predecessor) = committed.len().checked_sub(back + 1).map(|at| committed[at].clone()) else {
                continue;
            };
            let successor = predecessor
                .successor(format!("ver_{}", i + 1))
                .set_field("quantity", (100 - i) as f64);

            let result = ledger.commit_blocking(&signed_request(&parties, Some(&predecessor), successor.clone()));
            if back == 0 {
                let receipt = result.unwrap();
                prop_assert_eq!(receipt.height as usize, committed.len());
                committed.push(successor);
            } else {
                let is_conflict = matches!(result, Err(CommitError::Conflict { .. }));
                prop_assert!(is_conflict);
            }
        }

        let unconsumed = ledger.find_unconsumed_blocking(BATCH, "BATCH-1").unwrap();
        prop_assert_eq!(unconsumed.len(), 1);
        prop_assert_eq!(&unconsumed[0], committed.last().unwrap());

        let history = ledger.list_history_blocking(BATCH, "BATCH-1").unwrap();
        prop_assert_eq!(history.len(), committed.len());
        for (entry, expected) in history.iter().zip(committed.iter().rev()) {
            prop_assert_eq!(&entry.state, expected);
        }
        for pair in history.windows(2) {
            let (newer, older) = (&pair[0], &pair[1]);
            prop_assert_eq!(newer.height, older.height + 1);
            prop_assert_eq!(newer.predecessor.as_deref(), Some(older.state.version_id.as_str()));
            prop_assert_eq!(older.consumed_by.as_deref(), Some(newer.state.version_id.as_str()));
        }
        prop_assert!(!history[0].is_consumed());
    }
}

#[test]
fn unsigned_commit_leaves_the_chain_untouched() {
    let dir = tempdir().unwrap();
    let db = Arc::new(sled::open(dir.path().join("chain.db")).unwrap());
    let ledger = SledLedger::new(db).unwrap();
    let parties = vec![Party::generate("acme"), Party::generate("globex")];
    let participants = parties.iter().map(|p| p.identity().clone()).collect();

    let genesis = VersionedState::new("BATCH-2", "ver_0", participants, "open")
        .set_field("quantity", 10.0)
        .set_field("price", 1.0);
    // only the first party signs
    let request = signed_request(&parties[..1], None, genesis);

    let err = ledger.commit_blocking(&request).unwrap_err();
    assert_eq!(err, CommitError::MissingSignatures(vec!["globex".into()]));
    assert!(ledger.find_unconsumed_blocking(BATCH, "BATCH-2").unwrap().is_empty());
}
