//! Functions the gateway binary registers with its reference host
//!
//! Provides a small site-information call and a list-summing call that exercise
//! structured and list-shaped parameters and results over every format.

pub mod functions;
