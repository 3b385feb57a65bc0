//! Control API: the stateless HTTP surface fronting the Queue Controller,
//! Livestream Arbiter, Event Bus, Webhook Dispatcher, and Catalog Store.
//! Responsibilities are limited to request parsing, principal resolution,
//! delegation, and error-kind-to-status mapping (§4.I of the accompanying
//! design notes) — no domain logic lives here.

pub mod http;

pub use http::{AppState, router};
