use std::sync::Arc;

use async_trait::async_trait;

use super::{ServiceCore, ServiceDependencies, Supervisor};

const UNIT_PATH: &str = "/org/freedesktop/systemd1/unit/systemd_2dresolved_2eservice";

/// systemd-resolved supervisor. Its stub resolver fights with dnsmasq over
/// port 53, so the unit is kept masked, disabled and stopped.
pub struct SystemdResolvedService {
    core: ServiceCore,
}

impl SystemdResolvedService {
    pub fn new(deps: ServiceDependencies) -> Arc<Self> {
        let core = ServiceCore::new("systemd-resolved", UNIT_PATH, deps);
        core.set_auto_start(false);
        core.set_force_stop(true);
        Arc::new(SystemdResolvedService { core })
    }
}

#[async_trait]
impl Supervisor for SystemdResolvedService {
    fn core(&self) -> &ServiceCore {
        &self.core
    }
}
