//! Shared system-bus connection plumbing.

pub use zbus::Connection;

use crate::Result;

/// Connects to the system bus all the D-Bus clients share.
pub async fn connect_system() -> Result<Connection> {
    Ok(Connection::system().await?)
}
