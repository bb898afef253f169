//! Vehicle hub form controller.
//!
//! The hub is opened on one vehicle and carries three forms: the service log,
//! the condition log and the rental return. Each submission validates its
//! required fields locally, builds a record with coerced numbers, and issues
//! a single field-merge that appends to the log and updates the summary
//! fields together. Nothing is echoed locally; the change arrives with the
//! next snapshot.

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::client::{StoreClient, WriteOutcome};
use crate::error::{Error, Result};
use crate::model::{
    coerce_amount, coerce_mileage, ConditionEntry, ServiceRecord, Vehicle, VehicleStatus,
};
use crate::store::{json_number, FieldUpdate};

/// Date format accepted by the forms and used in stored documents.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Service log form. All fields hold raw user input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceForm {
    /// Service date, `YYYY-MM-DD`. Required.
    pub date: String,
    /// Work performed. Required.
    pub notes: String,
    /// Cost; unparsable input is recorded as zero.
    pub cost: String,
    /// Optional next scheduled service, `YYYY-MM-DD`.
    pub next_date: String,
}

impl ServiceForm {
    /// Validate the form into a record and optional next-service date.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the date or notes are missing or the
    /// dates do not parse.
    pub fn validate(&self) -> Result<(ServiceRecord, Option<NaiveDate>)> {
        let date = required_date("date", &self.date)?;
        let notes = required_text("notes", &self.notes)?;
        let next = optional_date("next_date", &self.next_date)?;

        Ok((
            ServiceRecord {
                date,
                notes,
                cost: coerce_amount(&self.cost),
            },
            next,
        ))
    }

    /// Field updates recording `record`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record fails to serialize.
    pub fn updates(record: &ServiceRecord, next: Option<NaiveDate>) -> Result<Vec<FieldUpdate>> {
        let mut updates = vec![
            FieldUpdate::array_union("serviceHistory", serde_json::to_value(record)?),
            FieldUpdate::set("lastServiceDate", format_date(record.date)),
        ];
        if let Some(next) = next {
            updates.push(FieldUpdate::set("nextServiceDate", format_date(next)));
        }
        Ok(updates)
    }
}

/// Condition log form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionForm {
    /// Observation date, `YYYY-MM-DD`. Blank means the submission day.
    pub date: String,
    /// Odometer reading; unparsable input is recorded as zero.
    pub mileage: String,
    /// Observation. Required.
    pub note: String,
}

impl ConditionForm {
    /// A blank form dated `today`.
    #[must_use]
    pub fn dated(today: NaiveDate) -> Self {
        Self {
            date: format_date(today),
            ..Self::default()
        }
    }

    /// Validate the form into an entry and mileage reading.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the note is missing or the date does
    /// not parse.
    pub fn validate(&self, today: NaiveDate) -> Result<(ConditionEntry, u64)> {
        let date = optional_date("date", &self.date)?.unwrap_or(today);
        let note = required_text("note", &self.note)?;
        Ok((ConditionEntry { date, note }, coerce_mileage(&self.mileage)))
    }

    /// Field updates recording `entry`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry fails to serialize.
    pub fn updates(entry: &ConditionEntry, mileage: u64) -> Result<Vec<FieldUpdate>> {
        Ok(vec![
            FieldUpdate::array_union("conditionLog", serde_json::to_value(entry)?),
            FieldUpdate::set("currentMileage", mileage),
        ])
    }
}

/// Rental return form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RentalForm {
    /// Days the vehicle was out. Required, positive whole number.
    pub days: String,
}

impl RentalForm {
    /// Validate the number of days rented.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] unless `days` is a positive whole number.
    pub fn validate(&self) -> Result<u32> {
        let days = required_text("days", &self.days)?;
        match days.parse::<u32>() {
            Ok(days) if days > 0 => Ok(days),
            _ => Err(Error::validation("days", "must be a positive whole number")),
        }
    }

    /// Field updates closing a rental of `days` at `price_per_day`.
    #[must_use]
    pub fn updates(days: u32, price_per_day: f64) -> Vec<FieldUpdate> {
        let revenue = json_number(f64::from(days) * price_per_day);
        vec![
            FieldUpdate::increment("totalDaysRented", days),
            FieldUpdate::Increment("lifetimeRevenue".to_string(), revenue),
            FieldUpdate::set("status", VehicleStatus::Available.as_str()),
        ]
    }
}

/// Form controller for one vehicle.
#[derive(Debug)]
pub struct VehicleHub {
    client: StoreClient,
    vehicle: Vehicle,
    /// Service log form.
    pub service: ServiceForm,
    /// Condition log form.
    pub condition: ConditionForm,
    /// Rental return form.
    pub rental: RentalForm,
}

impl VehicleHub {
    /// Open the hub on a vehicle with blank forms.
    #[must_use]
    pub fn open(client: StoreClient, vehicle: Vehicle, today: NaiveDate) -> Self {
        debug!(vehicle = %vehicle.id, "Opening vehicle hub");
        Self {
            client,
            vehicle,
            service: ServiceForm::default(),
            condition: ConditionForm::dated(today),
            rental: RentalForm::default(),
        }
    }

    /// The vehicle as last seen.
    #[must_use]
    pub fn vehicle(&self) -> &Vehicle {
        &self.vehicle
    }

    /// Replace the vehicle with a fresher copy, keeping form input.
    pub fn refresh(&mut self, vehicle: Vehicle) {
        if vehicle.id == self.vehicle.id {
            self.vehicle = vehicle;
        }
    }

    /// Submit the service form.
    ///
    /// On success the form is cleared; on a write failure it is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the form is incomplete. Write failures
    /// are logged and reported as [`WriteOutcome::Failed`].
    pub async fn submit_service(&mut self) -> Result<WriteOutcome> {
        let (record, next) = self.service.validate()?;
        let updates = ServiceForm::updates(&record, next)?;

        let outcome = self.client.merge(&self.vehicle.id, &updates).await;
        if outcome == WriteOutcome::Saved {
            info!(vehicle = %self.vehicle.id, date = %record.date, cost = record.cost, "Service recorded");
            self.service = ServiceForm::default();
        }
        Ok(outcome)
    }

    /// Submit the condition form. A blank date means `today`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the form is incomplete. Write failures
    /// are logged and reported as [`WriteOutcome::Failed`].
    pub async fn submit_condition(&mut self, today: NaiveDate) -> Result<WriteOutcome> {
        let (entry, mileage) = self.condition.validate(today)?;
        let updates = ConditionForm::updates(&entry, mileage)?;

        let outcome = self.client.merge(&self.vehicle.id, &updates).await;
        if outcome == WriteOutcome::Saved {
            info!(vehicle = %self.vehicle.id, date = %entry.date, mileage, "Condition recorded");
            self.condition = ConditionForm::dated(today);
        }
        Ok(outcome)
    }

    /// Submit the rental return form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if `days` is not a positive whole number.
    /// Write failures are logged and reported as [`WriteOutcome::Failed`].
    pub async fn submit_rental(&mut self) -> Result<WriteOutcome> {
        let days = self.rental.validate()?;
        let updates = RentalForm::updates(days, self.vehicle.price_per_day);

        let outcome = self.client.merge(&self.vehicle.id, &updates).await;
        if outcome == WriteOutcome::Saved {
            info!(vehicle = %self.vehicle.id, days, "Rental return recorded");
            self.rental = RentalForm::default();
        }
        Ok(outcome)
    }
}

/// Format a date the way documents store it.
#[must_use]
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a `YYYY-MM-DD` date.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming `field` if the input does not parse.
pub fn parse_date(field: &'static str, input: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT)
        .map_err(|_| Error::validation(field, format!("'{}' is not a YYYY-MM-DD date", input.trim())))
}

fn required_text(field: &'static str, input: &str) -> Result<String> {
    let input = input.trim();
    if input.is_empty() {
        return Err(Error::validation(field, "is required"));
    }
    Ok(input.to_string())
}

fn required_date(field: &'static str, input: &str) -> Result<NaiveDate> {
    if input.trim().is_empty() {
        return Err(Error::validation(field, "is required"));
    }
    parse_date(field, input)
}

fn optional_date(field: &'static str, input: &str) -> Result<Option<NaiveDate>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    parse_date(field, input).map(Some)
}
