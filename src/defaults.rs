/// Compiled-in defaults for scan configuration and user-facing help text.
use core::time::Duration;

/// Automatic stop after this long unless the caller picks another timeout.
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(30);

/// No smoothing by default.
pub const SMOOTHING_WINDOW: usize = 1;

/// Largest smoothing window a scan configuration accepts.
pub const MAX_SMOOTHING_WINDOW: usize = 32;

/// Explains what an IRK is and where to find one.
pub const KEY_HELP: &str = "\
WHAT IS AN IRK?

An Identity Resolving Key (IRK) is a 16-byte secret key used in Bluetooth Low
Energy to identify devices that use Resolvable Private Addresses (RPAs).

RPAs are randomized MAC addresses that change periodically to prevent
tracking. Only devices that hold the IRK can identify the real device behind
the changing address.

HOW TO OBTAIN AN IRK:

IRKs are exchanged during Bluetooth pairing and stored locally on bonded
hosts. You can extract them from:

  Linux:    /var/lib/bluetooth/<adapter>/<device>/info
            [IdentityResolvingKey] section
  macOS:    /Library/Preferences/com.apple.Bluetooth.plist (root required)
  Windows:  HKLM\\SYSTEM\\CurrentControlSet\\Services\\BTHPORT\\Parameters\\Keys\\
            <adapter>\\<device> \"IRK\" value
  Android:  /data/misc/bluedroid/bt_config.conf (root required)
            LE_LOCAL_KEY_IRK

IRKs cannot be sniffed from the air. They are exchanged over an encrypted
channel during pairing.
";
