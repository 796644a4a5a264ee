//! Core library of the Wi-Fi supervisor daemon.
//!
//! The crate keeps a single wireless interface on exactly one of two regimes,
//! client or hotspot, by supervising the collaborating OS daemons
//! (wpa_supplicant or NetworkManager, hostapd, dnsmasq, dhcpcd, avahi,
//! systemd-resolved) over the system D-Bus and arbitrating mode switches from
//! their unified event stream.

pub mod blink;
pub mod config;
pub mod control;
pub mod dbus;
pub mod event;
pub mod handler;
pub mod iface;
pub mod journal;
pub mod manager;
pub mod monitor;
pub mod nm_dbus;
pub mod platform;
pub mod platform_config;
pub mod service;
pub mod store;
pub mod systemd;
pub mod timer;
pub mod util;
pub mod web;
pub mod wpa_dbus;

#[cfg(test)]
pub(crate) mod testkit;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal per-unit failure; the orchestrator shuts down cleanly on it.
    #[error("service {service}: {reason}")]
    Service { service: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("D-Bus error: {0}")]
    Dbus(#[from] zbus::Error),

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Wraps any error into the fatal per-service taxonomy entry.
    pub fn service(service: impl Into<String>, reason: impl ToString) -> Self {
        Error::Service {
            service: service.into(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;
