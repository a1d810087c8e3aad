//! Supervision tree.
//!
//! ```text
//!   DispatcherController (flat registry: EntityId -> Dispatcher)
//!        |
//!        +-- Dispatcher(sys) ---- tracers: cpu, mem, swap
//!        |
//!        +-- Dispatcher(root) --- tracers: cpu, mem, io, fd, child, stat
//!              |
//!              +-- Dispatcher(child) -- tracers ...
//!                    |
//!                    +-- ...
//! ```
//!
//! Every dispatcher and every tracer runs on its own thread. Cancellation is
//! cooperative through [`ExitFlag`]s; every wait on shutdown is bounded by
//! the configured grace period.

pub mod cache;
mod context;
mod controller;
mod dispatcher;
mod entity;
mod error;
mod exit;
mod process;
mod system;
mod tracer;

pub use cache::{
    FrontendCache, Percentage, ProcessCache, ProcessSnapshot, SystemCache, SystemSnapshot,
    SystemSummary, percent,
};
pub use context::DispatchContext;
pub use controller::DispatcherController;
pub use dispatcher::{Dispatcher, DispatcherState, SpawnedDispatcher};
pub use entity::EntityId;
pub use error::DispatchError;
pub use exit::ExitFlag;
pub use tracer::{Scope, TracerHandle, TracerKind};
