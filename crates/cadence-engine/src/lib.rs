//! Tick driver for the Cadence automation engine.
//!
//! Each tick reads the stored cursor, evaluates every automated asset's
//! condition tree against the live instance, and replaces the cursor with
//! the results in a single write.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `cadence.yaml` into typed
//!   structs.
//! - [`error`] -- [`ConfigError`], [`TickError`], [`StoreError`], and the
//!   top-level [`EngineError`].
//! - [`logging`] -- Tracing subscriber setup.
//! - [`store`] -- [`CursorStore`] with in-memory and file implementations.
//! - [`tick`] -- [`TickEngine`], the topological, concurrent tick.
//!
//! [`ConfigError`]: error::ConfigError
//! [`TickError`]: error::TickError
//! [`StoreError`]: error::StoreError
//! [`EngineError`]: error::EngineError
//! [`CursorStore`]: store::CursorStore
//! [`TickEngine`]: tick::TickEngine

pub mod config;
pub mod error;
pub mod logging;
pub mod store;
pub mod tick;
