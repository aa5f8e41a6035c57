//! Alert dispatch
//!
//! Turns steam events and feed health reports into alerts, applies
//! per-category cooldown and pinning policy, and delivers them through a
//! [`Notifier`].

mod dispatcher;
mod notifier;
mod types;

pub use dispatcher::AlertDispatcher;
pub use notifier::{LogNotifier, Notifier, NotifyError};
pub use types::{
    Alert, AlertCategory, AlertConfig, DispatchError, DispatchOutcome, DispatchStats, Severity,
};
