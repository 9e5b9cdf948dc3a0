//! Request handlers

mod vms;

pub use vms::*;
