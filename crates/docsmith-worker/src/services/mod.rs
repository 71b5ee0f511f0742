//! Outbound integrations.

pub mod notify;

pub use notify::{LogNotifier, SlackNotifier};
