//! Configuration of the Meridian consensus core.

pub mod config;

/// The identity consensus knows a validator by.
pub type ValidatorId = meridian_api::crypto::Address;
