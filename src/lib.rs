pub mod calendar;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod templates;
pub mod tracker;
pub mod usage;
pub mod validation;
pub mod valuation;
pub mod views;
pub mod windows;

pub use error::{Error, Result};
