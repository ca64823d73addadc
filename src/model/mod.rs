//! Resource schemas served by the framework.
//!
//! Each kind implements [`Resource`](crate::framework::Resource) and brings its own creation and
//! replacement payloads.

pub mod order;
pub mod product;
pub mod user;

pub use order::*;
pub use product::*;
pub use user::*;

use crate::framework::ValidationError;

fn require_non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(format!("{field} must not be empty")));
    }
    Ok(())
}

/// Money amounts: finite and non-negative.
fn require_amount(field: &str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(ValidationError::new(format!(
            "{field} must be a non-negative number, got {value}"
        )));
    }
    Ok(())
}
