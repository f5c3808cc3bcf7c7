use crate::record::{ClientId, TelemetryRecord};
use std::fs;
use std::path::{Path, PathBuf};

pub const UNAVAILABLE: f32 = -1.0;

/// Full-speed RPM of the Argon40 mini fan; PWM duty cycle is scaled against it.
pub const ARGON40_MAX_RPM: f32 = 8400.0;

const PROC_STAT: &str = "proc/stat";
const THERMAL_ZONE: &str = "sys/class/thermal/thermal_zone0/temp";
const SCALING_CUR_FREQ: &str = "sys/devices/system/cpu/cpu0/cpufreq/scaling_cur_freq";
const COOLING_FAN_HWMON: &str = "sys/devices/platform/cooling_fan/hwmon";
const PWM_PERIOD: &str = "sys/class/pwm/pwmchip0/pwm0/period";
const PWM_DUTY_CYCLE: &str = "sys/class/pwm/pwmchip0/pwm0/duty_cycle";
const HOSTNAME: &str = "proc/sys/kernel/hostname";

fn read_number<T: std::str::FromStr>(path: &Path) -> Option<T> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Returns `(idle, total)` jiffies from the aggregate `cpu` line.
pub fn parse_proc_stat(text: &str) -> Option<(u64, u64)> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(7)
        .map(|f| f.parse().ok())
        .collect::<Option<_>>()?;
    if fields.len() < 7 {
        return None;
    }
    // user nice system idle iowait irq softirq
    Some((fields[3], fields.iter().sum()))
}

/// CPU load as the busy share of jiffies since the previous sample.
#[derive(Debug, Default)]
pub struct CpuLoad {
    prev_idle: u64,
    prev_total: u64,
}

impl CpuLoad {
    pub fn update(&mut self, idle: u64, total: u64) -> f32 {
        let total_delta = total.saturating_sub(self.prev_total);
        let idle_delta = idle.saturating_sub(self.prev_idle);
        self.prev_idle = idle;
        self.prev_total = total;
        if total_delta == 0 {
            return 0.0;
        }
        (1.0 - idle_delta as f32 / total_delta as f32) * 100.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FanSource {
    /// Pi 5 `pwm_fan` driver reporting RPM directly.
    Hwmon(PathBuf),
    /// PWM channel driven by a fan-control service; RPM is estimated from duty cycle.
    Pwm { duty_cycle: PathBuf, period: u64 },
    None,
}

impl FanSource {
    pub fn detect(root: &Path) -> Self {
        if let Ok(dir) = fs::read_dir(root.join(COOLING_FAN_HWMON)) {
            let mut inputs: Vec<PathBuf> = dir
                .filter_map(|e| e.ok())
                .map(|e| e.path().join("fan1_input"))
                .filter(|p| p.exists())
                .collect();
            inputs.sort();
            if let Some(first) = inputs.into_iter().next() {
                return FanSource::Hwmon(first);
            }
        }
        match read_number::<u64>(&root.join(PWM_PERIOD)) {
            Some(period) if period > 0 => FanSource::Pwm {
                duty_cycle: root.join(PWM_DUTY_CYCLE),
                period,
            },
            _ => FanSource::None,
        }
    }

    pub fn read(&self) -> f32 {
        match self {
            FanSource::Hwmon(path) => read_number::<u64>(path).map_or(0.0, |rpm| rpm as f32),
            FanSource::Pwm { duty_cycle, period } => read_number::<u64>(duty_cycle)
                .map_or(0.0, |duty| (duty as f32 / *period as f32) * ARGON40_MAX_RPM),
            FanSource::None => 0.0,
        }
    }
}

/// Reads the local board's health counters and packs them into a [`TelemetryRecord`].
///
/// Every path is resolved under `root` so the readers can be pointed at a fixture
/// tree. Readings that cannot be taken use `-1.0`, except the fan which falls back
/// to `0.0`.
pub struct Sampler {
    root: PathBuf,
    client_id: ClientId,
    cpu: CpuLoad,
    fan: FanSource,
}

impl Sampler {
    pub fn with_root(root: impl Into<PathBuf>, client_id: ClientId) -> Self {
        let root = root.into();
        let fan = FanSource::detect(&root);
        Self {
            root,
            client_id,
            cpu: CpuLoad::default(),
            fan,
        }
    }

    pub fn fan_source(&self) -> &FanSource {
        &self.fan
    }

    pub fn cpu_load(&mut self) -> f32 {
        match fs::read_to_string(self.root.join(PROC_STAT))
            .ok()
            .as_deref()
            .and_then(parse_proc_stat)
        {
            Some((idle, total)) => self.cpu.update(idle, total),
            None => UNAVAILABLE,
        }
    }

    /// Millidegrees Celsius to degrees.
    pub fn cpu_temp(&self) -> f32 {
        read_number::<i64>(&self.root.join(THERMAL_ZONE))
            .map_or(UNAVAILABLE, |milli| milli as f32 / 1000.0)
    }

    /// kHz to MHz.
    pub fn cpu_mhz(&self) -> f32 {
        read_number::<u64>(&self.root.join(SCALING_CUR_FREQ))
            .map_or(UNAVAILABLE, |khz| khz as f32 / 1000.0)
    }

    pub fn sample(&mut self, timestamp: u64) -> TelemetryRecord {
        TelemetryRecord {
            client_id: self.client_id,
            cpu_load: self.cpu_load(),
            cpu_temp: self.cpu_temp(),
            cpu_mhz: self.cpu_mhz(),
            fan_speed: self.fan.read(),
            timestamp,
        }
    }
}

/// Kernel hostname, falling back to `$HOSTNAME`.
pub fn hostname(root: &Path) -> Option<String> {
    fs::read_to_string(root.join(HOSTNAME))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
}
