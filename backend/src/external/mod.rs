//! Clients for counterpart services

pub mod hospital;

pub use hospital::{HospitalClient, PERFORMED_BY_HEADER};
