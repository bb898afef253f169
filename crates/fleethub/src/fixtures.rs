//! Seed fleet used to populate an empty collection.

use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Vehicle;

const DEFAULT_FLEET: &str = include_str!("../fixtures/fleet.json");

/// The built-in six-vehicle fleet.
///
/// # Errors
///
/// Returns an error if the embedded fixture document fails to decode.
pub fn default_fleet() -> Result<Vec<Vehicle>> {
    parse_fleet(DEFAULT_FLEET)
}

/// Load a fleet from a JSON fixture file with the same shape as the built-in one.
///
/// # Errors
///
/// Returns an error if the file cannot be read, does not decode, or is empty.
pub fn load_fleet(path: &Path) -> Result<Vec<Vehicle>> {
    debug!("Loading fixtures from {}", path.display());
    let raw = std::fs::read_to_string(path)?;
    let fleet = parse_fleet(&raw)?;
    if fleet.is_empty() {
        return Err(Error::ConfigValidation {
            message: format!("fixture file {} contains no vehicles", path.display()),
        });
    }
    Ok(fleet)
}

/// Resolve the fixture set: the configured file if any, else the built-in fleet.
///
/// # Errors
///
/// Returns an error if the fixtures fail to load.
pub fn resolve(path: Option<&Path>) -> Result<Vec<Vehicle>> {
    match path {
        Some(path) => load_fleet(path),
        None => default_fleet(),
    }
}

fn parse_fleet(raw: &str) -> Result<Vec<Vehicle>> {
    Ok(serde_json::from_str(raw)?)
}
