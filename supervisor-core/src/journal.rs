use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Read-back of a failed unit's recent journal lines, so the failure context
/// lands in our own log.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn log_last_entries(&self, service: &str, count: u32);
}

pub struct ServiceJournal;

#[async_trait]
impl Journal for ServiceJournal {
    async fn log_last_entries(&self, service: &str, count: u32) {
        let output = Command::new("journalctl")
            .args([
                "-u",
                service,
                "-n",
                &count.to_string(),
                "--no-pager",
                "-o",
                "short-iso",
            ])
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                for line in String::from_utf8_lossy(&output.stdout).lines() {
                    info!(service, journal = line, "unit journal entry");
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                warn!(service, %stderr, "failed to read unit journal");
            }
            Err(error) => {
                warn!(service, %error, "failed to invoke journalctl");
            }
        }
    }
}
