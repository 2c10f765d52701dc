//! Built-in record types and the registry that serves them
use super::record_type::{AuxTransition, Constraint, FieldSpec, NumberRule, RecordType, StatusRule};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const AGREEMENT: &str = "Agreement";
pub const BATCH: &str = "Batch";
pub const EXCHANGE: &str = "Exchange";
pub const ENROLLMENT: &str = "Enrollment";
pub const INVOICE: &str = "Invoice";
pub const WALLET: &str = "Wallet";

pub fn agreement() -> RecordType {
    RecordType::new(AGREEMENT, &["issuer", "counterparty"], "draft")
        .immutable_roles(&["issuer"])
        .field(FieldSpec::text("title"))
        .field(FieldSpec::number("amount", NumberRule::Positive))
        .field(FieldSpec::time("start_date"))
        .field(FieldSpec::time("end_date"))
        .constraint(Constraint::Ordered {
            earlier: "start_date",
            later: "end_date",
        })
        .update_statuses(
            StatusRule::to(&["draft", "active", "terminated"]).only_from(&["draft", "active"]),
        )
}

// quantity may reach zero once issued, never at issue time
pub fn batch() -> RecordType {
    RecordType::new(BATCH, &["producer", "buyer"], "open")
        .immutable_roles(&["producer"])
        .field(FieldSpec::number_split(
            "quantity",
            NumberRule::Positive,
            NumberRule::NonNegative,
        ))
        .field(FieldSpec::number("price", NumberRule::Positive))
        .field(FieldSpec::number("remaining_quantity", NumberRule::NonNegative).optional())
        .constraint(Constraint::NotAbove {
            field: "remaining_quantity",
            bound: "quantity",
        })
        .update_statuses(StatusRule::to(&["open", "closed"]).only_from(&["open"]))
        .auxiliary(AuxTransition::new(
            "consume",
            StatusRule::to(&["open", "closed"]).only_from(&["open"]),
            &["remaining_quantity"],
        ))
}

// unlike Batch, an exchange never holds a zero quantity
pub fn exchange() -> RecordType {
    RecordType::new(EXCHANGE, &["seller", "buyer"], "listed")
        .immutable_roles(&["seller"])
        .field(FieldSpec::text("asset").immutable())
        .field(FieldSpec::number("quantity", NumberRule::Positive))
        .field(FieldSpec::number("price", NumberRule::Positive))
        .update_statuses(StatusRule::to(&["listed", "matched", "settled", "cancelled"]))
        .auxiliary(
            AuxTransition::new(
                "auction-status",
                StatusRule::to(&["listed", "auction", "closed"]),
                &[],
            )
            .restricted_to("seller"),
        )
}

pub fn enrollment() -> RecordType {
    RecordType::new(ENROLLMENT, &["provider", "member"], "pending")
        .immutable_roles(&["provider"])
        .field(FieldSpec::text("program").immutable())
        .field(FieldSpec::number("score", NumberRule::Finite))
        .field(FieldSpec::number("checks_passed", NumberRule::NonNegative).optional())
        .field(FieldSpec::flag("verified").optional())
        .update_statuses(StatusRule::to(&["pending", "enrolled", "withdrawn"]))
        .auxiliary(
            AuxTransition::new(
                "checks-update",
                StatusRule::to(&["pending", "enrolled"]),
                &["score", "checks_passed", "verified"],
            )
            .restricted_to("provider"),
        )
}

pub fn invoice() -> RecordType {
    RecordType::new(INVOICE, &["supplier", "customer"], "issued")
        .immutable_roles(&["supplier", "customer"])
        .field(FieldSpec::number("amount", NumberRule::Positive))
        .field(FieldSpec::number("tax", NumberRule::NonNegative))
        .field(FieldSpec::text("currency").immutable())
        .field(FieldSpec::time("issue_date").immutable())
        .field(FieldSpec::time("due_date"))
        .constraint(Constraint::Ordered {
            earlier: "issue_date",
            later: "due_date",
        })
        .update_statuses(StatusRule::to(&["issued", "paid", "cancelled"]).only_from(&["issued"]))
}

pub fn wallet() -> RecordType {
    RecordType::new(WALLET, &["owner", "custodian"], "active")
        .immutable_roles(&["owner"])
        .field(FieldSpec::text("currency").immutable())
        .field(FieldSpec::number("balance", NumberRule::NonNegative))
        .update_statuses(
            StatusRule::to(&["active", "frozen", "closed"]).only_from(&["active", "frozen"]),
        )
}

/// Registry of record types by name.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    types: BTreeMap<&'static str, Arc<RecordType>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }
    /// Catalog preloaded with every built-in record type.
    pub fn builtin() -> Self {
        [agreement(), batch(), exchange(), enrollment(), invoice(), wallet()]
            .into_iter()
            .fold(Self::new(), |catalog, record_type| catalog.with(record_type))
    }
    pub fn with(mut self, record_type: RecordType) -> Self {
        self.register(record_type);
        self
    }
    pub fn register(&mut self, record_type: RecordType) {
        self.types.insert(record_type.name, Arc::new(record_type));
    }
    pub fn get(&self, name: &str) -> Option<Arc<RecordType>> {
        self.types.get(name).cloned()
    }
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.keys().copied()
    }
}
