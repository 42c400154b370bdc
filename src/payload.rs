//! Dashboard event envelope and the PTO lookup projection carried in it.

use serde::{Serialize, Serializer};

use crate::storage::PtoRecord;

pub const BULK_TARGET: &str = "all";
pub const BULK_PTO_LOOKUP_EVENT: &str = "bulk_pto_lookup";

/// Envelope published to the dashboard topic. Field order is the JSON key
/// order on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardEventPayload<D> {
    pub target: String,
    pub event_type: String,
    pub message: String,
    pub data: D,
}

/// Builds a dashboard event. Pure: identical arguments always serialize to
/// identical bytes.
pub fn build_payload<D: Serialize>(
    target: &str,
    event_type: &str,
    message: &str,
    data: D,
) -> DashboardEventPayload<D> {
    DashboardEventPayload {
        target: target.to_owned(),
        event_type: event_type.to_owned(),
        message: message.to_owned(),
        data,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtoLookup {
    pub pto_records: Vec<PtoBalance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PtoBalance {
    pub employee_id: String,
    /// `None` when the datastore holds no balance for the employee.
    #[serde(serialize_with = "serialize_balance")]
    pub pto_balance: Option<f64>,
}

impl From<PtoRecord> for PtoBalance {
    fn from(record: PtoRecord) -> Self {
        PtoBalance {
            employee_id: record.employee_id,
            pto_balance: record.balance,
        }
    }
}

impl PtoLookup {
    pub fn from_records(records: Vec<PtoRecord>) -> Self {
        PtoLookup {
            pto_records: records.into_iter().map(PtoBalance::from).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.pto_records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pto_records.is_empty()
    }
}

pub fn lookup_message(found: usize) -> String {
    format!("Bulk PTO lookup: found {} records.", found)
}

/// Builds the bulk lookup event; the record count in the message always
/// matches the records carried in `data`.
pub fn bulk_lookup_payload(lookup: PtoLookup) -> DashboardEventPayload<PtoLookup> {
    let message = lookup_message(lookup.len());
    build_payload(BULK_TARGET, BULK_PTO_LOOKUP_EVENT, &message, lookup)
}

// whole balances go out as integers (5, not 5.0), missing ones as null
fn serialize_balance<S: Serializer>(
    balance: &Option<f64>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match *balance {
        None => serializer.serialize_none(),
        Some(b) if b.fract() == 0.0 && b >= i64::MIN as f64 && b < i64::MAX as f64 => {
            serializer.serialize_i64(b as i64)
        }
        Some(b) => serializer.serialize_f64(b),
    }
}
