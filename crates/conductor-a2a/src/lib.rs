//! Agent-to-agent (A2A) signal bus for Conductor.
//!
//! Agents coordinate through signals: broadcasts seen by every subscriber,
//! directed one-way messages, and request/response calls. Signals are
//! appended to a [`SignalLog`] and never mutated except for a processed
//! marker. The bus runs either on a durable transport (JSONL log plus the
//! configured [`CallHandler`]) or, in mock mode, on an in-memory log with a
//! [`SyntheticResponder`], with identical call signatures in both modes.
//!
//! # Main types
//!
//! - [`Signal`]: One message on the bus.
//! - [`SignalBus`]: Broadcast, send, call and subscribe.
//! - [`Subscription`]: Cursor over the log for one agent.
//! - [`SignalLog`]: Append-only storage, [`FileSignalLog`] or [`MemorySignalLog`].
//! - [`SignalReplayer`]: Replays recorded signals into a disconnected bus.

/// The bus itself.
pub mod bus;
/// Signal storage.
pub mod log;
/// Replay sessions over recorded signals.
pub mod replay;
/// Call handlers.
pub mod responder;
/// Signal and filter types.
pub mod signal;

pub use bus::{CallResponse, SignalBus, Subscription};
pub use log::{FileSignalLog, MemorySignalLog, SignalLog};
pub use replay::{ReplayResults, ReplaySession, ReplaySettings, ReplaySpeed, ReplayStatus, SignalReplayer};
pub use responder::{CallHandler, SyntheticResponder};
pub use signal::{signal_types, Signal, SignalFilter};
