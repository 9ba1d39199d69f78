//! Loan application and guarantor allocation workflow for a cooperative
//! savings society, exposed as a library plus an HTTP service binary.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
