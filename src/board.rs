/// Board identification, selected at compile time via feature flags.
///
/// Reported in status messages so companions can tell scanners apart.

#[cfg(feature = "board-xiao")]
mod hw {
    pub const BOARD_NAME: &str = "xiao_esp32s3";
    pub const CHIP: &str = "ESP32-S3";
}

#[cfg(all(feature = "board-m5stickc", not(feature = "board-xiao")))]
mod hw {
    pub const BOARD_NAME: &str = "m5stickc_plus2";
    pub const CHIP: &str = "ESP32";
}

#[cfg(not(any(feature = "board-xiao", feature = "board-m5stickc")))]
mod hw {
    pub const BOARD_NAME: &str = "host";
    pub const CHIP: &str = std::env::consts::ARCH;
}

pub use hw::*;
