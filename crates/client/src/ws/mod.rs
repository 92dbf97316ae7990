//! Push channel for real-time updates.
//!
//! This module provides:
//! - Connection management with fixed-delay auto-reconnect
//! - Duplicate suppression for identity-bearing events
//! - Fan-out of decoded events to independently registered consumers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            ConnectionManager             │
//! │  (one driver task per subject, FSM)      │
//! └──────────────────────────────────────────┘
//!                      │ text frames
//!                      ▼
//!           ┌─────────────────────┐
//!           │   EventDispatcher   │
//!           │ decode → DedupWindow│
//!           └─────────────────────┘
//!                      │ InboundEvent
//!       ┌──────────────┼──────────────┐
//!       ▼              ▼              ▼
//! ┌────────────┐ ┌────────────┐ ┌────────────┐
//! │   Cache    │ │  Analysis  │ │   Other    │
//! │ Reconciler │ │  Tracker   │ │ consumers  │
//! └────────────┘ └────────────┘ └────────────┘
//! ```
//!
//! One frame's handler chain runs to completion before the next frame is
//! read, so the dedup window and caches never see concurrent pushes.

mod connection;
mod dedup;
mod dispatcher;
mod manager;

pub use connection::{
    ConnectionState, Connector, FrameSink, FrameStream, Transport, TungsteniteConnector, WsHandle,
};
pub use dedup::DedupWindow;
pub use dispatcher::{Callback, EventDispatcher, FrameOutcome, Subscription};
pub use manager::ConnectionManager;
