use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{ServiceCore, ServiceDependencies, Supervisor};
use crate::util;
use crate::Result;

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/avahi_2ddaemon_2eservice";

/// avahi supervisor: keeps mDNS announcing the device under its rendered
/// hostname. Reconciliation rewrites /etc/hostname and /etc/hosts.
pub struct AvahiService {
    core: ServiceCore,
    hostname: String,
    hosts_file: PathBuf,
    hostname_file: PathBuf,
}

impl AvahiService {
    pub fn new(deps: ServiceDependencies, hostname: impl Into<String>) -> Arc<Self> {
        Self::with_paths(deps, hostname, "/etc/hosts", "/etc/hostname")
    }

    pub fn with_paths(
        deps: ServiceDependencies,
        hostname: impl Into<String>,
        hosts_file: impl Into<PathBuf>,
        hostname_file: impl Into<PathBuf>,
    ) -> Arc<Self> {
        Arc::new(AvahiService {
            core: ServiceCore::new("avahi-daemon", UNIT_PATH, deps),
            hostname: hostname.into(),
            hosts_file: hosts_file.into(),
            hostname_file: hostname_file.into(),
        })
    }
}

#[async_trait]
impl Supervisor for AvahiService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }

    async fn need_config_setup(&self) -> Result<bool> {
        Ok(self.core.platform().hostname().await? != self.hostname)
    }

    async fn setup_config(&self) -> Result<()> {
        let current = self.core.platform().hostname().await?;

        util::create_file(&self.hostname_file, &format!("{}\n", self.hostname))?;

        self.core
            .platform()
            .execute_command(&format!("hostname -F {}", self.hostname_file.display()))
            .await?;

        util::replace_in_file(&self.hosts_file, &current, &self.hostname)?;

        info!(
            old_hostname = %current,
            new_hostname = %self.hostname,
            "updated hostname"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{test_dependencies, MockSystemd};
    use std::fs;

    #[tokio::test]
    async fn matching_hostname_needs_no_setup() {
        let dir = tempfile::tempdir().unwrap();
        let deps = test_dependencies(Arc::new(MockSystemd::new()));
        let service = AvahiService::with_paths(
            deps,
            "raspberrypi",
            dir.path().join("hosts"),
            dir.path().join("hostname"),
        );

        assert!(!service.need_config_setup().await.unwrap());
    }

    #[tokio::test]
    async fn setup_rewrites_hostname_and_hosts() {
        let dir = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        let hostname = dir.path().join("hostname");
        fs::write(&hosts, "127.0.0.1 localhost\n127.0.1.1 raspberrypi\n").unwrap();
        fs::write(&hostname, "raspberrypi\n").unwrap();

        let deps = test_dependencies(Arc::new(MockSystemd::new()));
        let service = AvahiService::with_paths(deps, "er-edge-0001", &hosts, &hostname);

        assert!(service.need_config_setup().await.unwrap());
        service.setup_config().await.unwrap();

        assert_eq!(fs::read_to_string(&hostname).unwrap(), "er-edge-0001\n");
        let hosts_content = fs::read_to_string(&hosts).unwrap();
        assert!(hosts_content.contains("127.0.1.1 er-edge-0001"));
        assert!(!hosts_content.contains("raspberrypi"));
    }
}
