//! Fleet data model.
//!
//! These types are the typed schema of a vehicle document. Field names and
//! nesting match the persisted document shape, so stored data written by
//! other clients of the same collection decodes unchanged.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hub::DATE_FORMAT;
use crate::store::json_number;

/// Rental status of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum VehicleStatus {
    /// Ready to rent.
    #[default]
    Available,
    /// Currently out with a customer.
    Rented,
}

impl VehicleStatus {
    /// The other status. Toggling is unconditional.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Available => Self::Rented,
            Self::Rented => Self::Available,
        }
    }

    /// The stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Rented => "Rented",
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One entry of a vehicle's service history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Day the service was performed.
    pub date: NaiveDate,
    /// What was done.
    pub notes: String,
    /// Cost of the service.
    #[serde(
        default,
        serialize_with = "serialize_amount",
        deserialize_with = "non_negative_f64"
    )]
    pub cost: f64,
}

/// One entry of a vehicle's condition log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEntry {
    /// Day the condition was recorded.
    pub date: NaiveDate,
    /// Observation.
    pub note: String,
}

/// A fleet vehicle.
///
/// `id` is assigned by the store and is not part of the document body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    /// Store-assigned document id.
    #[serde(skip)]
    pub id: String,
    /// Display name, e.g. "Lamborghini Huracán EVO".
    pub name: String,
    /// Model year.
    #[serde(default)]
    pub year: u16,
    /// Category, e.g. "Supercar".
    #[serde(rename = "type", default)]
    pub vehicle_type: String,
    /// Daily rental price.
    #[serde(
        default,
        serialize_with = "serialize_amount",
        deserialize_with = "non_negative_f64"
    )]
    pub price_per_day: f64,
    /// Image reference.
    #[serde(default)]
    pub image_url: String,
    /// Rental status.
    pub status: VehicleStatus,
    /// Most recent service. Blank or unreadable stored dates read as unset.
    #[serde(default, deserialize_with = "lenient_date")]
    pub last_service_date: Option<NaiveDate>,
    /// Next scheduled service. Blank or unreadable stored dates read as unset.
    #[serde(default, deserialize_with = "lenient_date")]
    pub next_service_date: Option<NaiveDate>,
    /// Append-only service log, in insertion order.
    #[serde(default)]
    pub service_history: Vec<ServiceRecord>,
    /// Odometer reading.
    #[serde(default, deserialize_with = "non_negative_u64")]
    pub current_mileage: u64,
    /// Append-only condition log, in insertion order.
    #[serde(default)]
    pub condition_log: Vec<ConditionEntry>,
    /// Cumulative rental days.
    #[serde(default, deserialize_with = "non_negative_u64")]
    pub total_days_rented: u64,
    /// Cumulative rental revenue.
    #[serde(
        default,
        serialize_with = "serialize_amount",
        deserialize_with = "non_negative_f64"
    )]
    pub lifetime_revenue: f64,
}

impl Vehicle {
    /// Whether the next service is due within `months` of `today`.
    ///
    /// Overdue services are also flagged. Vehicles without a scheduled
    /// service are never flagged.
    #[must_use]
    pub fn is_service_due_soon(&self, today: NaiveDate, months: u32) -> bool {
        let Some(next) = self.next_service_date else {
            return false;
        };
        match today.checked_add_months(Months::new(months)) {
            Some(horizon) => next <= horizon,
            None => true,
        }
    }

    /// Average revenue per rented day, if the vehicle has been rented.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn revenue_per_day(&self) -> Option<f64> {
        (self.total_days_rented > 0).then(|| self.lifetime_revenue / self.total_days_rented as f64)
    }
}

/// Coerce a user-entered amount, falling back to zero.
///
/// Blank, unparsable, negative and non-finite input all become `0.0`.
#[must_use]
pub fn coerce_amount(input: &str) -> f64 {
    match input.trim().parse::<f64>() {
        Ok(value) if value.is_finite() && value > 0.0 => value,
        _ => 0.0,
    }
}

/// Coerce a user-entered odometer reading, falling back to zero.
///
/// Fractional readings are truncated.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn coerce_mileage(input: &str) -> u64 {
    let input = input.trim();
    if let Ok(value) = input.parse::<u64>() {
        return value;
    }
    let amount = coerce_amount(input);
    // Saturating float-to-int conversion
    amount as u64
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn serialize_amount<S>(value: &f64, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    json_number(*value).serialize(serializer)
}

fn lenient_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()))
}

fn non_negative_f64<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    })
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn non_negative_u64<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0);
    Ok(if value.is_finite() && value > 0.0 {
        value as u64
    } else {
        0
    })
}
