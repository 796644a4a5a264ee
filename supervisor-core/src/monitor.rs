use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::platform::Platform;
use crate::service::WifiClientService;
use crate::systemd::Systemd;
use crate::timer::ReusableTimer;

#[derive(Debug, Clone)]
pub struct ConnectionMonitorConfig {
    pub ping_interval: Duration,
    pub ping_timeout: u64,
    pub ping_fail_limit: u32,
}

/// One step of the restore chain run after consecutive probe failures.
pub enum RestoreAction {
    ResetWireless(Arc<dyn WifiClientService>),
    RestartServices {
        systemd: Arc<dyn Systemd>,
        pattern: String,
    },
    ExecuteCommand {
        platform: Arc<dyn Platform>,
        command: String,
    },
}

impl RestoreAction {
    /// Parses the line-per-action configuration. Malformed lines are skipped
    /// with a warning.
    pub fn parse_all(
        lines: &[String],
        client: &Arc<dyn WifiClientService>,
        systemd: &Arc<dyn Systemd>,
        platform: &Arc<dyn Platform>,
    ) -> Vec<RestoreAction> {
        let mut actions = Vec::new();
        for line in lines {
            let (name, value) = match line.trim().split_once(' ') {
                Some((name, value)) => (name, Some(value.trim())),
                None => (line.trim(), None),
            };

            match (name, value) {
                ("reset-wireless", _) => {
                    actions.push(RestoreAction::ResetWireless(client.clone()));
                }
                ("restart-service", Some(pattern)) => {
                    actions.push(RestoreAction::RestartServices {
                        systemd: systemd.clone(),
                        pattern: pattern.to_string(),
                    });
                }
                ("execute-command", Some(command)) => {
                    actions.push(RestoreAction::ExecuteCommand {
                        platform: platform.clone(),
                        command: command.to_string(),
                    });
                }
                _ => warn!(action = line.as_str(), "ignoring malformed restore action"),
            }
        }
        actions
    }

    pub async fn run(&self) {
        match self {
            RestoreAction::ResetWireless(client) => {
                if let Err(reset_error) = client.reset_wireless().await {
                    error!(error = %reset_error, "failed to reset wireless connection");
                } else {
                    info!("reset wireless connection");
                }
            }
            RestoreAction::RestartServices { systemd, pattern } => {
                let services = match systemd.list_service_names(pattern).await {
                    Ok(services) => services,
                    Err(list_error) => {
                        error!(pattern = pattern.as_str(), error = %list_error,
                               "failed to list services");
                        return;
                    }
                };
                for service in services {
                    match systemd.restart_service(&service).await {
                        Ok(()) => info!(service = service.as_str(), "restarted service"),
                        Err(restart_error) => error!(
                            service = service.as_str(),
                            error = %restart_error,
                            "failed to restart service"
                        ),
                    }
                }
            }
            RestoreAction::ExecuteCommand { platform, command } => {
                match platform.execute_command(command).await {
                    Ok(_) => info!(command = command.as_str(), "executed command"),
                    Err(command_error) => error!(
                        command = command.as_str(),
                        error = %command_error,
                        "failed to execute command"
                    ),
                }
            }
        }
    }
}

/// Periodic reachability probe with a restore-action chain. Armed while the
/// client holds a lease, disarmed whenever the client is not connected or the
/// hotspot runs.
pub struct ConnectionMonitor {
    platform: Arc<dyn Platform>,
    timer: ReusableTimer,
    config: ConnectionMonitorConfig,
    failures: AtomicU32,
    actions: Vec<RestoreAction>,
}

impl ConnectionMonitor {
    pub fn new(
        platform: Arc<dyn Platform>,
        config: ConnectionMonitorConfig,
        actions: Vec<RestoreAction>,
    ) -> Arc<Self> {
        Arc::new(ConnectionMonitor {
            platform,
            timer: ReusableTimer::new(),
            config,
            failures: AtomicU32::new(0),
            actions,
        })
    }

    pub fn start(self: Arc<Self>) {
        let this = self.clone();
        self.timer
            .start(self.config.ping_interval, move || this.clone().check_connection());
    }

    pub fn stop(&self) {
        self.timer.cancel();
    }

    pub fn is_running(&self) -> bool {
        self.timer.is_alive()
    }

    async fn check_connection(self: Arc<Self>) {
        let timeout = self.config.ping_timeout;
        let reachable = self.platform.ping_default_gateway(timeout).await
            && self.platform.ping_tunnel_endpoint(timeout).await;

        if reachable {
            self.failures.store(0, Ordering::SeqCst);
        } else {
            let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(failures, timeout, "connectivity probe failed");

            if failures >= self.config.ping_fail_limit {
                self.failures.store(0, Ordering::SeqCst);
                error!("failed to reach default gateway, executing restore actions");
                for action in &self.actions {
                    action.run().await;
                }
            }
        }

        // monitoring survives transient probe errors
        self.timer.restart();
    }
}
