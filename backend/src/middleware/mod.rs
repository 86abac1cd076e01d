//! Request extractors shared by the handlers

mod performer;

pub use performer::Performer;
