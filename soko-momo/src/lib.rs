//! MTN MoMo Collections API adapter.
//!
//! Implements the `CollectionGateway` trait over the provider's REST API:
//! bearer-token auth with a cached token and one refresh retry, the
//! request-to-pay call, and the status lookup the checkout poll loop uses.

pub mod client;
pub mod msisdn;

pub use client::{MomoClient, MomoConfig};
