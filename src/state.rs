//! Versioned record states and their building blocks
use super::identity::Identity;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Typed payload of a record, keyed by field name.
pub type Fields = BTreeMap<String, FieldValue>;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub enum FieldValue {
    #[n(0)]
    Text(#[n(0)] String),
    #[n(1)]
    Number(#[n(0)] f64),
    #[n(2)]
    Time(#[n(0)] TimeStamp<Utc>),
    #[n(3)]
    Flag(#[n(0)] bool),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Number(_) => "number",
            FieldValue::Time(_) => "time",
            FieldValue::Flag(_) => "flag",
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Flag(value)
    }
}

impl From<TimeStamp<Utc>> for FieldValue {
    fn from(value: TimeStamp<Utc>) -> Self {
        FieldValue::Time(value)
    }
}

/// Reference to one version of a record.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateRef {
    #[n(0)]
    pub business_key: String,
    #[n(1)]
    pub version_id: String,
}

/// One immutable version of a record in its lifecycle chain.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct VersionedState {
    #[n(0)]
    pub business_key: String, // stable across every version of the record
    #[n(1)]
    pub version_id: String, // fresh on each transition
    #[n(2)]
    pub participants: Vec<Identity>, // ordered by the record type's roles
    #[n(3)]
    pub status: String,
    #[n(4)]
    pub fields: Fields,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub last_updated_at: TimeStamp<Utc>,
}

impl VersionedState {
    /// A brand-new state with no history.
    pub fn new(
        business_key: impl Into<String>,
        version_id: impl Into<String>,
        participants: Vec<Identity>,
        status: impl Into<String>,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            business_key: business_key.into(),
            version_id: version_id.into(),
            participants,
            status: status.into(),
            fields: Fields::new(),
            created_at: now.clone(),
            last_updated_at: now,
        }
    }
    pub fn set_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }
    pub fn set_fields(mut self, fields: Fields) -> Self {
        self.fields.extend(fields);
        self
    }
    pub fn set_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }
    /// Draft the next version: same record, fresh version id, bumped update time.
    pub fn successor(&self, version_id: impl Into<String>) -> Self {
        Self {
            version_id: version_id.into(),
            last_updated_at: TimeStamp::new(),
            ..self.clone()
        }
    }
    pub fn state_ref(&self) -> StateRef {
        StateRef {
            business_key: self.business_key.clone(),
            version_id: self.version_id.clone(),
        }
    }
    pub fn number(&self, name: &str) -> Option<f64> {
        match self.fields.get(name) {
            Some(FieldValue::Number(n)) => Some(*n),
            _ => None,
        }
    }
    pub fn text(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }
    pub fn time(&self, name: &str) -> Option<&TimeStamp<Utc>> {
        match self.fields.get(name) {
            Some(FieldValue::Time(t)) => Some(t),
            _ => None,
        }
    }
    pub fn participant_names(&self) -> Vec<&str> {
        self.participants
            .iter()
            .map(|p| p.organization.as_str())
            .collect()
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// ordered by instant; the zone type itself carries no ordering
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    /// `None` when the components do not name a valid UTC instant.
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Party;

    #[test]
    fn successor_keeps_identity_and_changes_version() {
        let issuer = Party::generate("acme");
        let buyer = Party::generate("globex");
        let original = VersionedState::new(
            "BATCH-1",
            "ver_a",
            vec![issuer.identity().clone(), buyer.identity().clone()],
            "open",
        )
        .set_field("quantity", 100.0);

        let next = original.successor("ver_b");

        assert_eq!(next.business_key, original.business_key);
        assert_eq!(next.participants, original.participants);
        assert_eq!(next.created_at, original.created_at);
        assert_eq!(next.version_id, "ver_b");
        assert_eq!(next.number("quantity"), Some(100.0));
    }

    #[test]
    fn versioned_state_cbor_roundtrip() {
        let owner = Party::generate("acme");
        let original = VersionedState::new("W-1", "ver_a", vec![owner.identity().clone()], "active")
            .set_field("currency", "EUR")
            .set_field("balance", 0.0)
            .set_field("frozen", false)
            .set_field("opened", TimeStamp::new_with(2024, 1, 2, 3, 4, 5).unwrap());

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: VersionedState = minicbor::decode(&encoded).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn timestamps_order_by_instant() {
        let earlier = TimeStamp::new_with(2025, 3, 1, 0, 0, 0).unwrap();
        let later = TimeStamp::new_with(2025, 3, 31, 0, 0, 0).unwrap();

        assert!(earlier < later);
        assert!(later >= earlier);
        assert_eq!(earlier.cmp(&earlier.clone()), std::cmp::Ordering::Equal);
    }

    #[test]
    fn impossible_dates_are_refused() {
        assert_eq!(TimeStamp::new_with(2025, 2, 30, 0, 0, 0), None);
        assert_eq!(TimeStamp::new_with(2025, 13, 1, 0, 0, 0), None);
        assert!(TimeStamp::new_with(2024, 2, 29, 23, 59, 59).is_some());
    }
}
