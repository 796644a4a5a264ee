mod nm;
mod wpa;

pub use nm::NetworkManagerStore;
pub use wpa::WpaSupplicantStore;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One provisioned network. Identity is the SSID; `priority` is an opaque
/// total order handed to the underlying supplicant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiNetwork {
    pub ssid: String,
    pub password: String,
    pub enabled: bool,
    pub priority: i32,
}

/// Persisted credential store behind a client supervisor. SSIDs are unique
/// within one store; list order is a read projection only.
pub trait NetworkStore: Send + Sync {
    fn config_file(&self) -> &Path;

    fn get(&self, ssid: &str) -> Option<WifiNetwork>;

    fn list(&self) -> Vec<WifiNetwork>;

    /// Inserts or replaces the network with the same SSID.
    fn add(&self, network: &WifiNetwork) -> Result<()>;

    fn remove(&self, ssid: &str) -> Result<()>;

    /// True when the store's fixed file content (e.g. the wpa_supplicant
    /// preamble) no longer matches what this configuration expects.
    fn needs_reconcile(&self) -> bool;

    fn reconcile(&self) -> Result<()>;
}
