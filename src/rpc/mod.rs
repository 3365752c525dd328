//! Web service request dispatching
//!
//! Drives one call from format negotiation through host dispatch to the
//! rendered envelope.

pub mod context;
pub mod server;
