use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use supervisor_core::blink::{BlinkConfig, BlinkControl, BlinkDeviceConfig, GpioBlinkDevice};
use supervisor_core::config::Settings;
use supervisor_core::control::{WifiControl, WifiControlConfig};
use supervisor_core::handler::WifiEventHandler;
use supervisor_core::iface::WlanInterfaceSelector;
use supervisor_core::journal::ServiceJournal;
use supervisor_core::manager::WifiManager;
use supervisor_core::monitor::{ConnectionMonitor, ConnectionMonitorConfig, RestoreAction};
use supervisor_core::nm_dbus::NetworkManagerDbus;
use supervisor_core::platform::{LinuxPlatform, Platform};
use supervisor_core::platform_config::PlatformConfig;
use supervisor_core::service::{
    AvahiService, DhcpServerService, DhcpcdService, DnsmasqConfig, DnsmasqService, HostapdConfig,
    HostapdService, NetworkManagerService, ServiceDependencies, Supervisor,
    SystemdResolvedService, WifiClientService, WpaSupplicantService,
};
use supervisor_core::store::{NetworkManagerStore, WpaSupplicantStore};
use supervisor_core::systemd::{Systemd, SystemdDbus};
use supervisor_core::timer::ReusableTimer;
use supervisor_core::util;
use supervisor_core::web::{WebServerConfig, WifiWebServer};
use supervisor_core::wpa_dbus::WpaSupplicantDbus;

const DEFAULT_CONFIG_FILE: &str = "/etc/wifi-supervisor/wifi-supervisor.conf";
const DEFAULT_CONFIG: &str = include_str!("../resources/wifi-supervisor.conf.default");

/// Wi-Fi mode supervisor for a single wireless interface.
#[derive(Debug, Parser)]
#[command(name = "wifi-supervisor", version, about)]
struct Args {
    /// configuration file
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// log file path
    #[arg(short = 'f', long)]
    log_file: Option<String>,
    /// logging level
    #[arg(short, long)]
    log_level: Option<String>,

    /// web server port to listen on
    #[arg(long)]
    api_server_port: Option<u16>,

    /// device role
    #[arg(long)]
    device_role: Option<String>,
    /// hostname pattern
    #[arg(long)]
    device_hostname: Option<String>,

    /// preferred wlan interface
    #[arg(long)]
    wlan_interface: Option<String>,
    /// country code
    #[arg(long)]
    wlan_country: Option<String>,
    /// disable wlan power save mode
    #[arg(long, action = clap::ArgAction::SetTrue)]
    wlan_disable_power_save: Option<bool>,
    /// disable wifi roaming
    #[arg(long, action = clap::ArgAction::SetTrue)]
    wlan_disable_roaming: Option<bool>,

    /// mode switching failure limit
    #[arg(long)]
    control_switch_fail_limit: Option<u32>,
    /// command to execute when reaching failure limit
    #[arg(long)]
    control_switch_fail_command: Option<String>,

    /// client timeout in seconds
    #[arg(long)]
    client_timeout: Option<u64>,
    /// client restart delay in seconds
    #[arg(long)]
    client_restart_delay: Option<u64>,

    /// hotspot Wi-Fi password
    #[arg(long)]
    hotspot_password: Option<String>,
    /// peer timeout in seconds
    #[arg(long)]
    hotspot_peer_timeout: Option<u64>,
    /// hotspot static IP address
    #[arg(long)]
    hotspot_static_ip: Option<String>,
    /// hotspot DHCP range
    #[arg(long)]
    hotspot_dhcp_range: Option<String>,
    /// hotspot startup delay in seconds
    #[arg(long)]
    hotspot_startup_delay: Option<u64>,
}

impl Args {
    /// CLI flag > config file > built-in default.
    fn overlay(&self, settings: &mut Settings) {
        macro_rules! overlay {
            ($field:ident) => {
                if let Some(value) = &self.$field {
                    settings.$field = value.clone();
                }
            };
        }

        if let Some(log_file) = &self.log_file {
            settings.log_file = Some(log_file.clone());
        }
        overlay!(log_level);
        if let Some(port) = self.api_server_port {
            settings.api_server_port = port;
        }
        overlay!(device_role);
        overlay!(device_hostname);
        overlay!(wlan_interface);
        overlay!(wlan_country);
        if let Some(flag) = self.wlan_disable_power_save {
            settings.wlan_disable_power_save = flag;
        }
        if let Some(flag) = self.wlan_disable_roaming {
            settings.wlan_disable_roaming = flag;
        }
        if let Some(limit) = self.control_switch_fail_limit {
            settings.control_switch_fail_limit = limit;
        }
        overlay!(control_switch_fail_command);
        if let Some(timeout) = self.client_timeout {
            settings.client_timeout = timeout;
        }
        if let Some(delay) = self.client_restart_delay {
            settings.client_restart_delay = delay;
        }
        overlay!(hotspot_password);
        if let Some(timeout) = self.hotspot_peer_timeout {
            settings.hotspot_peer_timeout = timeout;
        }
        overlay!(hotspot_static_ip);
        overlay!(hotspot_dhcp_range);
        if let Some(delay) = self.hotspot_startup_delay {
            settings.hotspot_startup_delay = delay;
        }
    }
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let config_file = args
        .config_file
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    if !config_file.exists() {
        if let Some(parent) = config_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::write(&config_file, DEFAULT_CONFIG)
            .with_context(|| format!("creating default configuration {}", config_file.display()))?;
    }

    let content = fs::read_to_string(&config_file)
        .with_context(|| format!("reading configuration {}", config_file.display()))?;

    let mut settings = Settings::default();
    settings.apply_ini(&content)?;
    args.overlay(&mut settings);
    Ok(settings)
}

fn init_logging(settings: &Settings) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));

    match &settings.log_file {
        Some(log_file) => {
            if let Some(parent) = PathBuf::from(log_file).parent() {
                fs::create_dir_all(parent)?;
            }
            let file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
                .with_context(|| format!("opening log file {log_file}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Arc::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;
    init_logging(&settings)?;

    info!(?settings, "started wifi-supervisor");

    run(settings).await
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let platform: Arc<dyn Platform> = Arc::new(LinuxPlatform::new());

    let interface = WlanInterfaceSelector::new(platform.clone())
        .select(&settings.wlan_interface)
        .await?;

    let debian_12_or_higher = platform.platform_version().await? >= 12.0;
    let platform_config = PlatformConfig::new(
        platform.clone(),
        &interface,
        PlatformConfig::boot_config_path(debian_12_or_higher),
    );
    if platform_config
        .setup(
            settings.wlan_disable_power_save,
            settings.wlan_disable_roaming,
        )
        .await?
    {
        warn!("platform configuration changed, reboot to apply changes");
    }

    let cpu_serial = platform.cpu_serial().await.unwrap_or_default();
    let mac_address = platform.mac_address(&interface).await;

    let mut id_context = HashMap::new();
    id_context.insert("device_role", settings.device_role.clone());
    id_context.insert("cpu_serial", cpu_serial);
    id_context.insert("mac_address", mac_address.clone());
    let hostname = util::render(&settings.device_hostname, &id_context);

    let connection = supervisor_core::dbus::connect_system().await?;
    let systemd: Arc<dyn Systemd> = Arc::new(SystemdDbus::new(connection.clone()).await?);
    let deps = ServiceDependencies {
        platform: platform.clone(),
        systemd: systemd.clone(),
        journal: Arc::new(ServiceJournal),
    };

    // client variant A (wpa_supplicant) and B (NetworkManager); the platform
    // version decides which one is live
    let wpa_store = Arc::new(WpaSupplicantStore::at_default_path(&settings.wlan_country));
    let wpa_dbus = Arc::new(WpaSupplicantDbus::new(connection.clone(), &interface));
    let nm_store = Arc::new(NetworkManagerStore::at_default_path(&interface));
    let nm_dbus = Arc::new(NetworkManagerDbus::new(
        connection.clone(),
        &interface,
        Duration::from_secs(settings.client_restart_delay),
    ));

    let dnsmasq = DnsmasqService::new(
        deps.clone(),
        connection.clone(),
        DnsmasqConfig {
            interface: interface.clone(),
            static_ip: settings.hotspot_static_ip.clone(),
            dhcp_range: settings.hotspot_dhcp_range.clone(),
            server_port: settings.api_server_port,
        },
    );
    let dhcpcd = DhcpcdService::new(deps.clone(), connection.clone(), &interface);
    let avahi = AvahiService::new(deps.clone(), &hostname);
    let resolved = SystemdResolvedService::new(deps.clone());
    let network_manager = NetworkManagerService::new(deps.clone(), nm_store, nm_dbus);
    let wpa_supplicant = WpaSupplicantService::new(
        deps.clone(),
        wpa_store,
        wpa_dbus,
        dhcpcd.clone(),
    );
    let hostapd = HostapdService::new(
        deps.clone(),
        HostapdConfig {
            interface: interface.clone(),
            mac_address,
            ssid: hostname.clone(),
            password: settings.hotspot_password.clone(),
            country: settings.wlan_country.clone(),
            startup_delay: settings.hotspot_startup_delay,
        },
        dnsmasq.clone() as Arc<dyn DhcpServerService>,
    );

    let mut services: Vec<Arc<dyn Supervisor>> = Vec::new();
    let client: Arc<dyn WifiClientService>;

    if debian_12_or_higher {
        init_service(&mut services, resolved, false).await?;
        init_service(&mut services, dhcpcd, false).await?;
        init_service(&mut services, avahi, true).await?;
        init_service(&mut services, dnsmasq.clone(), true).await?;
        init_service(&mut services, network_manager.clone(), true).await?;
        // NetworkManager drives wpa_supplicant internally; leave the unit alone
        init_service(&mut services, hostapd.clone(), true).await?;
        client = network_manager;
    } else {
        init_service(&mut services, resolved, false).await?;
        init_service(&mut services, dhcpcd, true).await?;
        init_service(&mut services, avahi, true).await?;
        init_service(&mut services, dnsmasq.clone(), true).await?;
        init_service(&mut services, network_manager, false).await?;
        init_service(&mut services, wpa_supplicant.clone(), true).await?;
        init_service(&mut services, hostapd.clone(), true).await?;
        client = wpa_supplicant;
    }

    let restore_actions = RestoreAction::parse_all(
        &settings.connection_restore_actions,
        &client,
        &systemd,
        &platform,
    );
    let monitor = ConnectionMonitor::new(
        platform.clone(),
        ConnectionMonitorConfig {
            ping_interval: Duration::from_secs(settings.connection_ping_interval),
            ping_timeout: settings.connection_ping_timeout,
            ping_fail_limit: settings.connection_ping_fail_limit,
        },
        restore_actions,
    );

    let control = WifiControl::new(
        client,
        hostapd,
        platform.clone(),
        WifiControlConfig {
            switch_fail_limit: settings.control_switch_fail_limit,
            switch_fail_command: settings.control_switch_fail_command.clone(),
        },
    );

    let blink = Arc::new(BlinkControl::new(BlinkConfig {
        frequency: settings.identify_blink_frequency,
        interval: settings.identify_blink_interval,
        pause: settings.identify_blink_pause,
        count: settings.identify_blink_count,
    }));
    let blink_device = Box::new(GpioBlinkDevice::new(BlinkDeviceConfig {
        gpio_number: settings.identify_pin_gpio_number,
        active_high: settings.identify_pin_active_high,
        initial_value: settings.identify_pin_initial_value,
    }));

    let handler = WifiEventHandler::new(
        control.clone(),
        Arc::new(ReusableTimer::new()),
        monitor.clone(),
        blink,
        blink_device,
        Duration::from_secs(settings.client_timeout),
        Duration::from_secs(settings.hotspot_peer_timeout),
    );

    let web = WifiWebServer::new(
        WebServerConfig {
            hotspot_ip: settings.hotspot_static_ip.clone(),
            server_port: settings.api_server_port,
        },
        platform.clone(),
        handler.clone(),
        &hostname,
        settings.web_execute_commands.clone(),
    );

    let manager = WifiManager::new(services, control, handler, monitor, web);

    spawn_signal_handler(manager.clone())?;

    manager.run().await?;
    Ok(())
}

/// Installed-but-unrequired units are kept force-stopped; missing required
/// units are fatal at startup.
async fn init_service(
    services: &mut Vec<Arc<dyn Supervisor>>,
    service: Arc<dyn Supervisor>,
    required: bool,
) -> anyhow::Result<()> {
    if service.is_installed().await {
        if !required {
            service.core().set_force_stop(true);
        }
        services.push(service);
        Ok(())
    } else if required {
        bail!("mandatory {} service is not installed", service.core().name());
    } else {
        Ok(())
    }
}

fn spawn_signal_handler(manager: Arc<WifiManager>) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        manager.shutdown().await;
    });
    Ok(())
}
