//! Backend runtime entry point and public API surface.
//!
//! This crate owns the backend lifecycle: the session store, the startup
//! reachability resolver, the playback controller with its media engine, the
//! window lifecycle and the restart coordinator. Bridge calls are routed to
//! services that drive those components.

mod app;
pub mod config;
pub mod playback;
pub mod resolver;
pub mod restart;
mod runtime;
mod services;
mod state;
pub mod store;
pub mod window;

pub use crate::restart::RelaunchTicket;
pub use crate::runtime::{BackendHandle, run};
