//! Domain model module declarations.

pub mod beacon;
pub mod question;
pub mod session;
pub mod signal;
