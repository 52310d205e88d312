/// Distance estimation from RSSI using the log-distance path loss model:
///
/// `distance = 10 ^ ((tx_power - rssi) / (10 * n))`
///
/// where `tx_power` is the advertised reference power at 1 m and `n` is the
/// path loss exponent of the environment.
use core::fmt;
use core::str::FromStr;

/// Environment presets with fixed path loss exponents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PathLoss {
    #[default]
    FreeSpace,
    Outdoor,
    Indoor,
}

impl PathLoss {
    pub const fn exponent(&self) -> f64 {
        match self {
            PathLoss::FreeSpace => 2.0,
            PathLoss::Outdoor => 2.2,
            PathLoss::Indoor => 3.0,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            PathLoss::FreeSpace => "free-space",
            PathLoss::Outdoor => "outdoor",
            PathLoss::Indoor => "indoor",
        }
    }
}

impl fmt::Display for PathLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PathLoss {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free-space" | "free_space" | "freespace" => Ok(PathLoss::FreeSpace),
            "outdoor" => Ok(PathLoss::Outdoor),
            "indoor" => Ok(PathLoss::Indoor),
            _ => Err("expected one of: free-space, outdoor, indoor"),
        }
    }
}

/// Estimate distance in meters.
///
/// Returns `None` if the advertisement carried no TX power, or if `rssi` is
/// exactly 0: radios report 0 dBm when the signal strength is unknown, so it
/// is not treated as a real reading.
pub fn estimate_distance(rssi: i8, tx_power: Option<i8>, environment: PathLoss) -> Option<f64> {
    let tx_power = tx_power?;
    if rssi == 0 {
        return None;
    }
    let loss = f64::from(i16::from(tx_power) - i16::from(rssi));
    let exponent = loss / (10.0 * environment.exponent());
    Some(10f64.powf(exponent))
}

/// Format a distance for display: `N/A`, `~35.5cm`, `~3.5m` or `~42m`.
pub fn format_distance(distance: Option<f64>) -> String {
    match distance {
        None => "N/A".into(),
        Some(d) if d < 1.0 => format!("~{:.1}cm", d * 100.0),
        Some(d) if d < 10.0 => format!("~{d:.1}m"),
        Some(d) => format!("~{d:.0}m"),
    }
}
