//! Node state probing.
//!
//! ```text
//!   NodeStateProbe (trait, boxed futures)
//!     ├── TalosctlProbe ── talosctl / kubectl subprocesses
//!     └── FakeProbe ────── scripted in-memory nodes for tests
//! ```
//!
//! Upgrade events are decoded into [`EventPayload`] at the subscription
//! boundary; transport failures arrive as [`StreamError`].

pub mod error;
pub mod events;
pub mod fake;
pub mod probe;
pub mod talosctl;

pub use error::{ProbeError, ProbeResult, StreamError};
pub use events::{Action, EventPayload, MachineStage};
pub use fake::{Call, FakeNode, FakeProbe, WatchScript};
pub use probe::{EventStream, NodeStateProbe, ProbeFuture, ServiceState, StaticWorkload, Tail};
pub use talosctl::TalosctlProbe;
