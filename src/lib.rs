pub use busco_protocol as protocol;

pub mod aggregate;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod pending;
pub mod pipeline;
pub mod planner;
pub mod stage;
pub mod summary;
pub mod tools;
pub mod transfer;

pub use error::{BatchError, Result};
