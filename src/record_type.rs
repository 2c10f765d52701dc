//! Static descriptors for record types
//!
//! A `RecordType` carries everything that differs between business domains:
//! the field schema with its sign constraints, cross-field constraints, the
//! participant roles, and which statuses each transition may produce. The
//! verifier and the protocol are generic over it.

/// Sign constraint on a numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberRule {
    /// `> 0`
    Positive,
    /// `>= 0`
    NonNegative,
    /// any value that is not NaN or infinite, zero included
    Finite,
}

impl NumberRule {
    pub fn holds(&self, value: f64) -> bool {
        match self {
            NumberRule::Positive => value.is_finite() && value > 0.0,
            NumberRule::NonNegative => value.is_finite() && value >= 0.0,
            NumberRule::Finite => value.is_finite(),
        }
    }
    pub fn predicate(&self) -> &'static str {
        match self {
            NumberRule::Positive => "positive",
            NumberRule::NonNegative => "non_negative",
            NumberRule::Finite => "finite",
        }
    }
    pub fn message(&self, field: &str) -> String {
        match self {
            NumberRule::Positive => format!("{field} must be greater than zero."),
            NumberRule::NonNegative => format!("{field} must be zero or greater."),
            NumberRule::Finite => format!("{field} must be a valid number."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number {
        on_issue: NumberRule,
        on_update: NumberRule,
    },
    Time,
    Flag,
}

impl FieldKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Number { .. } => "number",
            FieldKind::Time => "time",
            FieldKind::Flag => "flag",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub immutable: bool,
}

impl FieldSpec {
    pub fn text(name: &'static str) -> Self {
        Self::new(name, FieldKind::Text)
    }
    /// Numeric field with the same rule on issue and update.
    pub fn number(name: &'static str, rule: NumberRule) -> Self {
        Self::new(
            name,
            FieldKind::Number {
                on_issue: rule,
                on_update: rule,
            },
        )
    }
    /// Numeric field whose strictness differs between issue and update.
    pub fn number_split(name: &'static str, on_issue: NumberRule, on_update: NumberRule) -> Self {
        Self::new(name, FieldKind::Number { on_issue, on_update })
    }
    pub fn time(name: &'static str) -> Self {
        Self::new(name, FieldKind::Time)
    }
    pub fn flag(name: &'static str) -> Self {
        Self::new(name, FieldKind::Flag)
    }
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
    pub fn immutable(mut self) -> Self {
        self.immutable = true;
        self
    }
    fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
            immutable: false,
        }
    }
}

/// Predicates spanning more than one field. Skipped when a field is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// numeric `field <= bound`
    NotAbove {
        field: &'static str,
        bound: &'static str,
    },
    /// time `earlier <= later`
    Ordered {
        earlier: &'static str,
        later: &'static str,
    },
}

/// Which statuses a transition may move from and to. Empty `from` means any.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRule {
    pub from: Vec<&'static str>,
    pub to: Vec<&'static str>,
}

impl StatusRule {
    pub fn to(to: &[&'static str]) -> Self {
        Self {
            from: vec![],
            to: to.to_vec(),
        }
    }
    pub fn only_from(mut self, from: &[&'static str]) -> Self {
        self.from = from.to_vec();
        self
    }
    pub fn allows_from(&self, status: &str) -> bool {
        self.from.is_empty() || self.from.iter().any(|s| *s == status)
    }
    pub fn allows_to(&self, status: &str) -> bool {
        self.to.iter().any(|s| *s == status)
    }
}

/// A narrow, named update with its own predicate subset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxTransition {
    pub name: &'static str,
    /// Only the participant holding this role may initiate it.
    pub restricted_to: Option<&'static str>,
    pub status: StatusRule,
    /// Fields this transition may change; everything else must stay put.
    pub mutable: Vec<&'static str>,
}

impl AuxTransition {
    pub fn new(name: &'static str, status: StatusRule, mutable: &[&'static str]) -> Self {
        Self {
            name,
            restricted_to: None,
            status,
            mutable: mutable.to_vec(),
        }
    }
    pub fn restricted_to(mut self, role: &'static str) -> Self {
        self.restricted_to = Some(role);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordType {
    pub name: &'static str,
    /// `participants[i]` plays `roles[i]`.
    pub roles: Vec<&'static str>,
    pub immutable_roles: Vec<&'static str>,
    pub distinct_participants: bool,
    pub fields: Vec<FieldSpec>,
    pub constraints: Vec<Constraint>,
    pub initial_status: &'static str,
    pub update: StatusRule,
    pub auxiliary: Vec<AuxTransition>,
}

impl RecordType {
    /// Construct a new descriptor, filled in with the builder methods below.
    pub fn new(name: &'static str, roles: &[&'static str], initial_status: &'static str) -> Self {
        Self {
            name,
            roles: roles.to_vec(),
            immutable_roles: vec![],
            distinct_participants: true,
            fields: vec![],
            constraints: vec![],
            initial_status,
            update: StatusRule::default(),
            auxiliary: vec![],
        }
    }
    pub fn immutable_roles(mut self, roles: &[&'static str]) -> Self {
        self.immutable_roles = roles.to_vec();
        self
    }
    pub fn allow_repeated_participants(mut self) -> Self {
        self.distinct_participants = false;
        self
    }
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }
    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
    pub fn update_statuses(mut self, rule: StatusRule) -> Self {
        self.update = rule;
        self
    }
    pub fn auxiliary(mut self, transition: AuxTransition) -> Self {
        self.auxiliary.push(transition);
        self
    }

    pub fn field_spec(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
    pub fn aux(&self, name: &str) -> Option<&AuxTransition> {
        self.auxiliary.iter().find(|a| a.name == name)
    }
    pub fn role_index(&self, role: &str) -> Option<usize> {
        self.roles.iter().position(|r| *r == role)
    }
}
