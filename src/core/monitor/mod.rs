// src/core/monitor/mod.rs

//! The monitor side of the keeper: typed RPC calls against the monitor's
//! `steward` schema, the retry discipline wrapping them, and the
//! LISTEN/NOTIFY subscription carrying asynchronous state changes.
//!
//! The RPC connection and the subscriber connection are always separate;
//! the subscriber connection is never used for calls.

pub mod client;
pub mod notifications;
pub mod protocol;
pub mod retry;

pub use client::MonitorClient;
pub use notifications::{
    CHANNEL_LOG, CHANNEL_STATE, MonitorNotification, NotificationListener, StateNotification,
};
pub use protocol::{AssignedState, NodeAddress, NodeHealth};
pub use retry::{RetryPolicy, Retrier};
