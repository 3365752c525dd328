//! HTTP transport layer for the web service gateway
//!
//! Provides the gateway endpoint, the health and discovery endpoints, and the
//! request/response plumbing the dispatcher runs against.

pub mod handlers;
pub mod transport;
