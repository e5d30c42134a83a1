//! noderoll health: post-upgrade verification of a node.
//!
//! ```text
//!   NodeWaiter
//!     ├── wait_for_services ─────────── role-specific system services
//!     ├── wait_for_static_workloads ─── control-plane static pods
//!     └── wait_for_node_ready ───────── reachability + cluster readiness
//! ```
//!
//! Verdicts over single observations live in [`checker`]; the waiter adds
//! deadlines, poll intervals and cancellation on top of an injected clock.

pub mod checker;
pub mod error;
pub mod waiter;

pub use checker::{
    CONTROL_PLANE_SERVICES, CONTROL_PLANE_WORKLOADS, Verdict, WORKER_SERVICES, required_services,
};
pub use error::{WaitError, WaitResult};
pub use waiter::NodeWaiter;
