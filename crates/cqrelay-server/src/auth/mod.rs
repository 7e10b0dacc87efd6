//! Client authentication for the upgrade request.

pub mod bearer;

pub use bearer::{bearer_value, check_bearer};
