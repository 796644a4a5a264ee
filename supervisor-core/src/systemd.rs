use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use tracing::debug;
use zbus::zvariant::OwnedObjectPath;
use zbus::Connection;
use zbus_macros::proxy;

use crate::{Error, Result};

/// Stream of a unit's `ActiveState` values, already deduplicated by D-Bus
/// (one item per property change).
pub type UnitStateStream = BoxStream<'static, String>;

#[proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1"
)]
trait SystemdManager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;
    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn enable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
        force: bool,
    ) -> zbus::Result<(bool, Vec<(String, String, String)>)>;
    fn disable_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
    ) -> zbus::Result<Vec<(String, String, String)>>;
    fn mask_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
        force: bool,
    ) -> zbus::Result<Vec<(String, String, String)>>;
    fn unmask_unit_files(
        &self,
        files: &[&str],
        runtime: bool,
    ) -> zbus::Result<Vec<(String, String, String)>>;

    fn get_unit_file_state(&self, file: &str) -> zbus::Result<String>;
    fn list_unit_files_by_patterns(
        &self,
        states: &[&str],
        patterns: &[&str],
    ) -> zbus::Result<Vec<(String, String)>>;

    fn reload(&self) -> zbus::Result<()>;
    fn subscribe(&self) -> zbus::Result<()>;
}

#[proxy(
    interface = "org.freedesktop.systemd1.Unit",
    default_service = "org.freedesktop.systemd1"
)]
trait SystemdUnit {
    #[zbus(property)]
    fn active_state(&self) -> zbus::Result<String>;
}

/// Unit-manager seam the supervisors talk through. The real implementation is
/// [`SystemdDbus`]; tests substitute an in-memory one.
#[async_trait]
pub trait Systemd: Send + Sync {
    async fn start_service(&self, name: &str) -> Result<()>;
    async fn stop_service(&self, name: &str) -> Result<()>;
    async fn restart_service(&self, name: &str) -> Result<()>;

    async fn enable_service(&self, name: &str) -> Result<()>;
    async fn disable_service(&self, name: &str) -> Result<()>;
    async fn mask_service(&self, name: &str) -> Result<()>;
    async fn unmask_service(&self, name: &str) -> Result<()>;

    /// Reloads the systemd unit database (`daemon-reload`).
    async fn reload_daemon(&self) -> Result<()>;

    async fn is_active(&self, unit_path: &str) -> bool;
    async fn is_enabled(&self, name: &str) -> bool;
    async fn is_masked(&self, name: &str) -> bool;
    async fn is_installed(&self, name: &str) -> bool;

    /// Unit names whose unit files match the glob pattern.
    async fn list_service_names(&self, pattern: &str) -> Result<Vec<String>>;

    /// Per-unit `ActiveState` subscription at the unit's D-Bus path.
    async fn watch_active_state(&self, unit_path: &str) -> Result<UnitStateStream>;
}

pub struct SystemdDbus {
    connection: Connection,
    manager: SystemdManagerProxy<'static>,
}

impl SystemdDbus {
    pub async fn new(connection: Connection) -> Result<Self> {
        let manager = SystemdManagerProxy::new(&connection).await?;
        // Without Subscribe systemd does not emit unit PropertiesChanged
        // signals to us.
        manager.subscribe().await?;
        Ok(SystemdDbus {
            connection,
            manager,
        })
    }

    fn unit_file(name: &str) -> String {
        if name.contains('.') {
            name.to_string()
        } else {
            format!("{name}.service")
        }
    }

    async fn unit_file_state(&self, name: &str) -> Option<String> {
        self.manager
            .get_unit_file_state(&Self::unit_file(name))
            .await
            .ok()
    }
}

#[async_trait]
impl Systemd for SystemdDbus {
    async fn start_service(&self, name: &str) -> Result<()> {
        self.manager
            .start_unit(&Self::unit_file(name), "replace")
            .await?;
        Ok(())
    }

    async fn stop_service(&self, name: &str) -> Result<()> {
        self.manager
            .stop_unit(&Self::unit_file(name), "replace")
            .await?;
        Ok(())
    }

    async fn restart_service(&self, name: &str) -> Result<()> {
        self.manager
            .restart_unit(&Self::unit_file(name), "replace")
            .await?;
        Ok(())
    }

    async fn enable_service(&self, name: &str) -> Result<()> {
        self.manager
            .enable_unit_files(&[&Self::unit_file(name)], false, true)
            .await?;
        Ok(())
    }

    async fn disable_service(&self, name: &str) -> Result<()> {
        self.manager
            .disable_unit_files(&[&Self::unit_file(name)], false)
            .await?;
        Ok(())
    }

    async fn mask_service(&self, name: &str) -> Result<()> {
        self.manager
            .mask_unit_files(&[&Self::unit_file(name)], false, true)
            .await?;
        Ok(())
    }

    async fn unmask_service(&self, name: &str) -> Result<()> {
        self.manager
            .unmask_unit_files(&[&Self::unit_file(name)], false)
            .await?;
        Ok(())
    }

    async fn reload_daemon(&self) -> Result<()> {
        self.manager.reload().await?;
        Ok(())
    }

    async fn is_active(&self, unit_path: &str) -> bool {
        let Ok(builder) = SystemdUnitProxy::builder(&self.connection).path(unit_path.to_string())
        else {
            return false;
        };
        let Ok(unit) = builder.build().await else {
            return false;
        };
        matches!(unit.active_state().await.as_deref(), Ok("active"))
    }

    async fn is_enabled(&self, name: &str) -> bool {
        matches!(
            self.unit_file_state(name).await.as_deref(),
            Some("enabled") | Some("enabled-runtime")
        )
    }

    async fn is_masked(&self, name: &str) -> bool {
        matches!(
            self.unit_file_state(name).await.as_deref(),
            Some("masked") | Some("masked-runtime")
        )
    }

    async fn is_installed(&self, name: &str) -> bool {
        self.unit_file_state(name).await.is_some()
    }

    async fn list_service_names(&self, pattern: &str) -> Result<Vec<String>> {
        let files = self
            .manager
            .list_unit_files_by_patterns(&[], &[pattern])
            .await?;
        Ok(files
            .into_iter()
            .filter_map(|(path, _state)| {
                path.rsplit('/').next().map(str::to_string)
            })
            .collect())
    }

    async fn watch_active_state(&self, unit_path: &str) -> Result<UnitStateStream> {
        let unit = SystemdUnitProxy::builder(&self.connection)
            .path(unit_path.to_string())
            .map_err(Error::from)?
            .build()
            .await?;

        debug!(unit_path, "subscribing to unit state changes");
        let stream = unit
            .receive_active_state_changed()
            .await
            .filter_map(|change| async move { change.get().await.ok() });
        Ok(Box::pin(stream))
    }
}
