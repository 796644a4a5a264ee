use std::fs;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::{Error, Result};

/// Output device driven by the identification blink. Implementations are
/// synchronous; the whole blink runs on a blocking worker for the duration of
/// one identification request.
pub trait BlinkDevice: Send {
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn on(&mut self);
    fn off(&mut self);
}

#[derive(Debug, Clone)]
pub struct BlinkConfig {
    /// Toggle frequency in Hz.
    pub frequency: f64,
    /// Length of one blink group in seconds.
    pub interval: f64,
    /// Pause between groups in seconds.
    pub pause: f64,
    /// Number of groups.
    pub count: u32,
}

impl Default for BlinkConfig {
    fn default() -> Self {
        BlinkConfig {
            frequency: 440.0,
            interval: 0.5,
            pause: 0.5,
            count: 3,
        }
    }
}

/// Drives the identification waveform: `count` groups of `frequency × interval`
/// on/off cycles, `pause` seconds apart. The device is closed on every exit
/// path, including a failing `open`.
pub struct BlinkControl {
    config: BlinkConfig,
}

impl BlinkControl {
    pub fn new(config: BlinkConfig) -> Self {
        BlinkControl { config }
    }

    pub fn blink(&self, device: &mut dyn BlinkDevice) -> Result<()> {
        let result = device.open().and_then(|()| {
            self.run_waveform(device);
            Ok(())
        });
        device.close();
        result
    }

    fn run_waveform(&self, device: &mut dyn BlinkDevice) {
        let period = Duration::from_secs_f64(1.0 / self.config.frequency);
        let interval = Duration::from_secs_f64(self.config.interval);

        for group in 0..self.config.count {
            let start = Instant::now();
            while start.elapsed() < interval {
                device.on();
                sleep(period / 2);
                device.off();
                sleep(period / 2);
            }

            if group + 1 < self.config.count {
                sleep(Duration::from_secs_f64(self.config.pause));
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlinkDeviceConfig {
    pub gpio_number: u32,
    pub active_high: bool,
    pub initial_value: bool,
}

impl Default for BlinkDeviceConfig {
    fn default() -> Self {
        BlinkDeviceConfig {
            gpio_number: 12,
            active_high: true,
            initial_value: false,
        }
    }
}

/// GPIO line via the sysfs interface.
pub struct GpioBlinkDevice {
    config: BlinkDeviceConfig,
    value_file: Option<PathBuf>,
    gpio_root: PathBuf,
}

impl GpioBlinkDevice {
    pub fn new(config: BlinkDeviceConfig) -> Self {
        GpioBlinkDevice {
            config,
            value_file: None,
            gpio_root: PathBuf::from("/sys/class/gpio"),
        }
    }

    fn write_level(&mut self, high: bool) {
        let level = if high == self.config.active_high { "1" } else { "0" };
        if let Some(value_file) = &self.value_file {
            if let Err(error) = fs::write(value_file, level) {
                warn!(%error, "failed to write GPIO value");
            }
        }
    }
}

impl BlinkDevice for GpioBlinkDevice {
    fn open(&mut self) -> Result<()> {
        let pin_dir = self.gpio_root.join(format!("gpio{}", self.config.gpio_number));
        if !pin_dir.exists() {
            fs::write(
                self.gpio_root.join("export"),
                self.config.gpio_number.to_string(),
            )
            .map_err(|e| Error::CommandFailed(format!("GPIO export failed: {e}")))?;
        }
        fs::write(pin_dir.join("direction"), "out")
            .map_err(|e| Error::CommandFailed(format!("GPIO direction failed: {e}")))?;

        self.value_file = Some(pin_dir.join("value"));
        self.write_level(self.config.initial_value);
        Ok(())
    }

    fn close(&mut self) {
        if self.value_file.take().is_some() {
            let _ = fs::write(
                self.gpio_root.join("unexport"),
                self.config.gpio_number.to_string(),
            );
        }
    }

    fn on(&mut self) {
        self.write_level(true);
    }

    fn off(&mut self) {
        self.write_level(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingDevice {
        fail_open: bool,
        opened: u32,
        closed: u32,
        transitions: u32,
    }

    impl BlinkDevice for RecordingDevice {
        fn open(&mut self) -> Result<()> {
            if self.fail_open {
                return Err(Error::CommandFailed("no device".into()));
            }
            self.opened += 1;
            Ok(())
        }

        fn close(&mut self) {
            self.closed += 1;
        }

        fn on(&mut self) {
            self.transitions += 1;
        }

        fn off(&mut self) {}
    }

    #[test]
    fn blink_produces_expected_cycle_count() {
        let control = BlinkControl::new(BlinkConfig {
            frequency: 1000.0,
            interval: 0.02,
            pause: 0.0,
            count: 2,
        });
        let mut device = RecordingDevice::default();

        control.blink(&mut device).unwrap();

        assert_eq!(device.opened, 1);
        assert_eq!(device.closed, 1);
        // frequency x interval cycles per group, two groups; timing jitter
        // makes this approximate.
        assert!(device.transitions >= 20, "transitions={}", device.transitions);
    }

    #[test]
    fn device_closed_even_when_open_fails() {
        let control = BlinkControl::new(BlinkConfig::default());
        let mut device = RecordingDevice {
            fail_open: true,
            ..Default::default()
        };

        assert!(control.blink(&mut device).is_err());
        assert_eq!(device.closed, 1);
        assert_eq!(device.transitions, 0);
    }
}
