//! Contract verification for proposed transitions
//!
//! All functions here are pure and deterministic. Predicates are evaluated in a
//! fixed order and every failure is reported, so the same input always yields
//! the same violation list.
use super::error::{ContractViolation, Violation};
use super::identity::Identity;
use super::record_type::{AuxTransition, Constraint, FieldKind, RecordType, StatusRule};
use super::state::{FieldValue, VersionedState};
use std::collections::HashSet;

pub type Verdict = Result<(), ContractViolation>;

/// What a transition does to the version chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum TransitionKind {
    #[n(0)]
    Issue,
    #[n(1)]
    Update,
    #[n(2)]
    Auxiliary(#[n(0)] String),
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionKind::Issue => write!(f, "issue"),
            TransitionKind::Update => write!(f, "update"),
            TransitionKind::Auxiliary(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Default)]
struct Findings(Vec<Violation>);

impl Findings {
    fn require(&mut self, holds: bool, predicate: impl Into<String>, message: impl Into<String>) {
        if !holds {
            self.0.push(Violation::new(predicate, message));
        }
    }
    fn verdict(self) -> Verdict {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ContractViolation(self.0))
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Issue,
    Update,
}

/// Checks a state with no history.
pub fn verify_issue(
    record_type: &RecordType,
    predecessors: &[VersionedState],
    outputs: &[VersionedState],
    signers: &[Identity],
) -> Verdict {
    let mut findings = Findings::default();

    findings.require(
        predecessors.is_empty(),
        "issue.no_predecessor",
        "issue must not consume a prior state.",
    );
    findings.require(
        outputs.len() == 1,
        "issue.single_output",
        "issue must produce exactly one state.",
    );

    if let [candidate] = outputs {
        check_signers(&mut findings, candidate.participants.iter(), signers);
        check_participants(&mut findings, record_type, candidate);
        findings.require(
            !candidate.business_key.trim().is_empty(),
            "business_key.non_empty",
            "business key cannot be empty.",
        );
        findings.require(
            !candidate.version_id.trim().is_empty(),
            "version_id.non_empty",
            "version id cannot be empty.",
        );
        check_fields(&mut findings, record_type, candidate, Stage::Issue, None);
        check_constraints(&mut findings, record_type, candidate);
        findings.require(
            candidate.status == record_type.initial_status,
            "status.initial",
            format!(
                "status must be {} when a {} is issued.",
                record_type.initial_status, record_type.name
            ),
        );
    }

    findings.verdict()
}

/// Checks a general update that supersedes exactly one predecessor.
pub fn verify_update(
    record_type: &RecordType,
    predecessors: &[VersionedState],
    outputs: &[VersionedState],
    signers: &[Identity],
) -> Verdict {
    let mut findings = Findings::default();
    check_succession(
        &mut findings,
        record_type,
        predecessors,
        outputs,
        signers,
        &record_type.update,
        None,
    );
    findings.verdict()
}

/// Checks a named auxiliary update; only its mutable fields may change.
pub fn verify_auxiliary(
    record_type: &RecordType,
    transition: &AuxTransition,
    predecessors: &[VersionedState],
    outputs: &[VersionedState],
    signers: &[Identity],
) -> Verdict {
    let mut findings = Findings::default();
    check_succession(
        &mut findings,
        record_type,
        predecessors,
        outputs,
        signers,
        &transition.status,
        Some(transition),
    );
    findings.verdict()
}

/// Dispatches on the transition kind. Unknown auxiliary names are violations.
pub fn verify_transition(
    record_type: &RecordType,
    kind: &TransitionKind,
    predecessor: Option<&VersionedState>,
    candidate: &VersionedState,
    signers: &[Identity],
) -> Verdict {
    let predecessors: Vec<VersionedState> = predecessor.into_iter().cloned().collect();
    let outputs = std::slice::from_ref(candidate);

    match kind {
        TransitionKind::Issue => verify_issue(record_type, &predecessors, outputs, signers),
        TransitionKind::Update => verify_update(record_type, &predecessors, outputs, signers),
        TransitionKind::Auxiliary(name) => match record_type.aux(name) {
            Some(aux) => verify_auxiliary(record_type, aux, &predecessors, outputs, signers),
            None => Err(ContractViolation(vec![Violation::new(
                "transition.known",
                format!("{} has no transition named {name}.", record_type.name),
            )])),
        },
    }
}

fn check_succession(
    findings: &mut Findings,
    record_type: &RecordType,
    predecessors: &[VersionedState],
    outputs: &[VersionedState],
    signers: &[Identity],
    status: &StatusRule,
    aux: Option<&AuxTransition>,
) {
    let label = aux.map(|a| a.name).unwrap_or("update");

    findings.require(
        predecessors.len() == 1,
        "update.single_predecessor",
        format!("{label} must consume exactly one prior state."),
    );
    findings.require(
        outputs.len() == 1,
        "update.single_output",
        format!("{label} must produce exactly one state."),
    );

    let ([predecessor], [candidate]) = (predecessors, outputs) else {
        return;
    };

    // a participant being replaced signs away its place
    check_signers(
        findings,
        predecessor.participants.iter().chain(&candidate.participants),
        signers,
    );
    check_participants(findings, record_type, candidate);

    findings.require(
        predecessor.business_key == candidate.business_key,
        "business_key.unchanged",
        "business key cannot change.",
    );
    findings.require(
        !candidate.version_id.trim().is_empty(),
        "version_id.non_empty",
        "version id cannot be empty.",
    );
    findings.require(
        predecessor.version_id != candidate.version_id,
        "version_id.fresh",
        "each version must carry a new version id.",
    );
    findings.require(
        predecessor.created_at == candidate.created_at,
        "created_at.unchanged",
        "creation time cannot change.",
    );

    for role in &record_type.immutable_roles {
        let Some(index) = record_type.role_index(role) else {
            continue;
        };
        findings.require(
            predecessor.participants.get(index) == candidate.participants.get(index),
            format!("{role}.unchanged"),
            format!("{role} cannot change."),
        );
    }

    for spec in record_type.fields.iter().filter(|f| f.immutable) {
        findings.require(
            predecessor.fields.get(spec.name) == candidate.fields.get(spec.name),
            format!("{}.unchanged", spec.name),
            format!("{} cannot change.", spec.name),
        );
    }

    if let Some(aux) = aux {
        // participants and any field outside the subset are frozen
        findings.require(
            predecessor.participants == candidate.participants,
            "participants.unchanged",
            format!("participants cannot change during {}.", aux.name),
        );
        for spec in &record_type.fields {
            if spec.immutable || aux.mutable.contains(&spec.name) {
                continue;
            }
            findings.require(
                predecessor.fields.get(spec.name) == candidate.fields.get(spec.name),
                format!("{}.unchanged", spec.name),
                format!("{} cannot change during {}.", spec.name, aux.name),
            );
        }
    }

    check_fields(findings, record_type, candidate, Stage::Update, aux);
    check_constraints(findings, record_type, candidate);

    findings.require(
        status.allows_from(&predecessor.status),
        "status.from",
        format!(
            "a {} in status {} cannot take a {label}.",
            record_type.name, predecessor.status
        ),
    );
    findings.require(
        status.allows_to(&candidate.status),
        "status.allowed",
        format!("status {} is not allowed for {label}.", candidate.status),
    );
}

fn check_signers<'a>(
    findings: &mut Findings,
    required: impl Iterator<Item = &'a Identity>,
    signers: &[Identity],
) {
    let signed: HashSet<&Identity> = signers.iter().collect();
    let mut missing: Vec<&str> = vec![];
    for participant in required.filter(|p| !signed.contains(p)) {
        if !missing.contains(&participant.organization.as_str()) {
            missing.push(participant.organization.as_str());
        }
    }

    findings.require(
        missing.is_empty(),
        "signers.cover_participants",
        format!("every participant must sign; missing {}.", missing.join(", ")),
    );
}

fn check_participants(findings: &mut Findings, record_type: &RecordType, candidate: &VersionedState) {
    findings.require(
        candidate.participants.len() == record_type.roles.len(),
        "participants.roles",
        format!(
            "a {} needs exactly {} participants ({}), found {}.",
            record_type.name,
            record_type.roles.len(),
            record_type.roles.join(", "),
            candidate.participants.len()
        ),
    );

    if record_type.distinct_participants {
        let organizations: HashSet<&str> = candidate
            .participants
            .iter()
            .map(|p| p.organization.as_str())
            .collect();
        findings.require(
            organizations.len() == candidate.participants.len(),
            "participants.distinct",
            "participants must be distinct organizations.",
        );
    }
}

fn check_fields(
    findings: &mut Findings,
    record_type: &RecordType,
    candidate: &VersionedState,
    stage: Stage,
    aux: Option<&AuxTransition>,
) {
    for spec in &record_type.fields {
        if let Some(aux) = aux {
            if !aux.mutable.contains(&spec.name) {
                continue;
            }
        }

        let name = spec.name;
        let Some(value) = candidate.fields.get(name) else {
            findings.require(!spec.required, format!("{name}.present"), format!("{name} is required."));
            continue;
        };

        match (&spec.kind, value) {
            (FieldKind::Text, FieldValue::Text(text)) => findings.require(
                !text.trim().is_empty(),
                format!("{name}.non_empty"),
                format!("{name} cannot be empty."),
            ),
            (FieldKind::Number { on_issue, on_update }, FieldValue::Number(n)) => {
                let rule = match stage {
                    Stage::Issue => on_issue,
                    Stage::Update => on_update,
                };
                findings.require(
                    rule.holds(*n),
                    format!("{name}.{}", rule.predicate()),
                    rule.message(name),
                )
            }
            (FieldKind::Time, FieldValue::Time(_)) | (FieldKind::Flag, FieldValue::Flag(_)) => {}
            (kind, value) => findings.require(
                false,
                format!("{name}.type"),
                format!(
                    "{name} must be a {} value, found {}.",
                    kind.type_name(),
                    value.type_name()
                ),
            ),
        }
    }

    for name in candidate.fields.keys() {
        findings.require(
            record_type.field_spec(name).is_some(),
            format!("{name}.known"),
            format!("{name} is not a field of {}.", record_type.name),
        );
    }
}

fn check_constraints(findings: &mut Findings, record_type: &RecordType, candidate: &VersionedState) {
    for constraint in &record_type.constraints {
        match constraint {
            Constraint::NotAbove { field, bound } => {
                if let (Some(value), Some(limit)) = (candidate.number(field), candidate.number(bound)) {
                    findings.require(
                        value <= limit,
                        format!("{field}.not_above_{bound}"),
                        format!("{field} cannot exceed {bound}."),
                    );
                }
            }
            Constraint::Ordered { earlier, later } => {
                if let (Some(a), Some(b)) = (candidate.time(earlier), candidate.time(later)) {
                    findings.require(
                        a <= b,
                        format!("{earlier}.not_after_{later}"),
                        format!("{earlier} must not be after {later}."),
                    );
                }
            }
        }
    }
}
