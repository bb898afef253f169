//! Terminal presentation of the fleet.
//!
//! Everything here is a pure function of the inventory state and the
//! current date, so the same state always renders the same text.

use std::fmt;

use chrono::NaiveDate;
use serde::Serialize;

use crate::model::{Vehicle, VehicleStatus};
use crate::sync::{InventoryState, SyncPhase};

const RULE_WIDTH: usize = 60;

/// Rendering inputs that do not come from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Reference day for service-due checks.
    pub today: NaiveDate,
    /// Service-due-soon window in months.
    pub service_due_months: u32,
}

/// Aggregate figures for the whole fleet.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FleetSummary {
    /// Number of vehicles.
    pub total: usize,
    /// Vehicles ready to rent.
    pub available: usize,
    /// Vehicles out with customers.
    pub rented: usize,
    /// Vehicles flagged as service due soon.
    pub service_due: usize,
    /// Sum of days rented.
    pub total_days_rented: u64,
    /// Sum of lifetime revenue.
    pub lifetime_revenue: f64,
}

/// A vehicle with its id and computed flags, for JSON output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleView<'a> {
    /// Store-assigned id.
    pub id: &'a str,
    /// Stored fields.
    #[serde(flatten)]
    pub vehicle: &'a Vehicle,
    /// Next service falls inside the window or is overdue.
    pub service_due_soon: bool,
}

impl<'a> VehicleView<'a> {
    /// Wrap a vehicle for output.
    #[must_use]
    pub fn new(vehicle: &'a Vehicle, options: RenderOptions) -> Self {
        Self {
            id: &vehicle.id,
            vehicle,
            service_due_soon: vehicle.is_service_due_soon(options.today, options.service_due_months),
        }
    }
}

/// Compute fleet totals.
#[must_use]
pub fn summarize(vehicles: &[Vehicle], options: RenderOptions) -> FleetSummary {
    let rented = vehicles
        .iter()
        .filter(|v| v.status == VehicleStatus::Rented)
        .count();
    FleetSummary {
        total: vehicles.len(),
        available: vehicles.len() - rented,
        rented,
        service_due: vehicles
            .iter()
            .filter(|v| v.is_service_due_soon(options.today, options.service_due_months))
            .count(),
        total_days_rented: vehicles.iter().map(|v| v.total_days_rented).sum(),
        lifetime_revenue: vehicles.iter().map(|v| v.lifetime_revenue).sum(),
    }
}

/// Render the card grid, or the loading / error page.
#[must_use]
pub fn render_grid(state: &InventoryState, options: RenderOptions) -> String {
    if state.phase == SyncPhase::Error {
        return render_error(state.error.as_deref().unwrap_or("Unknown error"));
    }
    if state.is_loading() {
        return format!("Loading fleet ({})...\n", state.phase);
    }
    Grid { state, options }.to_string()
}

/// Render one vehicle card.
#[must_use]
pub fn render_card(vehicle: &Vehicle, options: RenderOptions) -> String {
    Card { vehicle, options }.to_string()
}

/// Render the full detail view of one vehicle.
#[must_use]
pub fn render_detail(vehicle: &Vehicle, options: RenderOptions) -> String {
    Detail { vehicle, options }.to_string()
}

/// Render fleet totals.
#[must_use]
pub fn render_summary(vehicles: &[Vehicle], options: RenderOptions) -> String {
    summarize(vehicles, options).to_string()
}

/// Render a full-page error message.
#[must_use]
pub fn render_error(message: &str) -> String {
    ErrorPage(message).to_string()
}

struct Grid<'a> {
    state: &'a InventoryState,
    options: RenderOptions,
}

impl fmt::Display for Grid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let vehicles = &self.state.vehicles;
        writeln!(f, "Fleet Overview")?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;

        if vehicles.is_empty() {
            writeln!(f)?;
            writeln!(f, "No vehicles in the fleet.")?;
        }
        for vehicle in vehicles {
            let card = Card {
                vehicle,
                options: self.options,
            };
            write!(f, "\n{card}")?;
        }

        write!(f, "\n{}", summarize(vehicles, self.options))?;
        match self.state.rejected {
            0 => Ok(()),
            1 => writeln!(f, "(1 malformed record skipped)"),
            n => writeln!(f, "({n} malformed records skipped)"),
        }
    }
}

struct Card<'a> {
    vehicle: &'a Vehicle,
    options: RenderOptions,
}

impl fmt::Display for Card<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.vehicle;
        writeln!(f, "[{:<9}] {} ({})", v.status, v.name, v.year)?;
        writeln!(
            f,
            "            {} | {}/day | {} mi",
            v.vehicle_type,
            format_money(v.price_per_day),
            group_thousands(v.current_mileage)
        )?;
        if v.is_service_due_soon(self.options.today, self.options.service_due_months) {
            writeln!(
                f,
                "            !! SERVICE DUE SOON ({})",
                format_optional_date(v.next_service_date)
            )?;
        }
        writeln!(f, "            id: {}", v.id)
    }
}

struct Detail<'a> {
    vehicle: &'a Vehicle,
    options: RenderOptions,
}

impl fmt::Display for Detail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.vehicle;
        writeln!(f, "{} ({})", v.name, v.year)?;
        writeln!(f, "{}", "=".repeat(RULE_WIDTH))?;
        writeln!(f, "  Id:              {}", v.id)?;
        writeln!(f, "  Type:            {}", v.vehicle_type)?;
        writeln!(f, "  Status:          {}", v.status)?;
        writeln!(f, "  Price per day:   {}", format_money(v.price_per_day))?;
        writeln!(f, "  Mileage:         {} mi", group_thousands(v.current_mileage))?;
        writeln!(f, "  Last service:    {}", format_optional_date(v.last_service_date))?;
        writeln!(f, "  Next service:    {}", format_optional_date(v.next_service_date))?;
        if v.is_service_due_soon(self.options.today, self.options.service_due_months) {
            writeln!(f, "                   !! SERVICE DUE SOON")?;
        }
        writeln!(f, "  Image:           {}", v.image_url)?;

        writeln!(f)?;
        writeln!(f, "[Rentals]")?;
        writeln!(f, "  Days rented:     {}", group_thousands(v.total_days_rented))?;
        writeln!(f, "  Lifetime revenue: {}", format_money(v.lifetime_revenue))?;
        if let Some(per_day) = v.revenue_per_day() {
            writeln!(f, "  Revenue per day: {}", format_money(per_day))?;
        }

        writeln!(f)?;
        writeln!(f, "[Service History]")?;
        if v.service_history.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for record in &v.service_history {
            writeln!(
                f,
                "  {}  {:>10}  {}",
                record.date,
                format_money(record.cost),
                record.notes
            )?;
        }

        writeln!(f)?;
        writeln!(f, "[Condition Log]")?;
        if v.condition_log.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for entry in &v.condition_log {
            writeln!(f, "  {}  {}", entry.date, entry.note)?;
        }
        Ok(())
    }
}

impl fmt::Display for FleetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(
            f,
            "{} vehicles: {} available, {} rented, {} due for service",
            self.total, self.available, self.rented, self.service_due
        )?;
        writeln!(
            f,
            "Lifetime: {} days rented, {} revenue",
            group_thousands(self.total_days_rented),
            format_money(self.lifetime_revenue)
        )
    }
}

struct ErrorPage<'a>(&'a str);

impl fmt::Display for ErrorPage<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "!".repeat(RULE_WIDTH);
        writeln!(f, "{rule}")?;
        writeln!(f)?;
        writeln!(f, "  FleetHub cannot load the fleet.")?;
        writeln!(f)?;
        for line in self.0.lines() {
            writeln!(f, "  {line}")?;
        }
        writeln!(f)?;
        writeln!(f, "{rule}")
    }
}

/// Build the JSON document for `list --json`.
#[must_use]
pub fn inventory_json(state: &InventoryState, options: RenderOptions) -> serde_json::Value {
    let vehicles: Vec<VehicleView<'_>> = state
        .vehicles
        .iter()
        .map(|v| VehicleView::new(v, options))
        .collect();
    serde_json::json!({
        "phase": state.phase,
        "revision": state.revision,
        "rejected": state.rejected,
        "error": state.error,
        "summary": summarize(&state.vehicles, options),
        "vehicles": vehicles,
    })
}

/// Format a monetary amount with thousands separators, e.g. `$72,000` or `$99.50`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_money(amount: f64) -> String {
    let cents = (amount.max(0.0) * 100.0).round() as u64;
    let whole = group_thousands(cents / 100);
    match cents % 100 {
        0 => format!("${whole}"),
        fraction => format!("${whole}.{fraction:02}"),
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn format_optional_date(date: Option<NaiveDate>) -> String {
    date.map_or_else(|| "-".to_string(), |d| d.to_string())
}
