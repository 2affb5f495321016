//! UEFI stub that selects a boot configuration from redundant config
//! partitions and launches the configured payload.

#![no_std]
#![no_main]

extern crate alloc;

use core::fmt::Write;

use log::{error, info, warn};
use selector::{load_config, LoadVerdict, LoaderParams};
use uefi::{
    boot,
    system::{with_stderr, with_stdout},
    Status,
};

pub mod handoff;
pub mod logging;
pub mod platform;
pub mod volumes;

/// The name of this bootloader.
const BOOT_GUARD_NAME: &str = "boot-guard";
/// The version of boot-guard.
const BOOT_GUARD_VERSION: &str = core::env!("CARGO_PKG_VERSION");

/// The number of microseconds to stall before returning when an error occurs
/// while UEFI boot services is still active.
const STALL_ON_ERROR_TIME: usize = 10_000_000;

/// The watchdog code reported if the armed watchdog fires; codes up to
/// 0xffff are reserved for the firmware.
const WATCHDOG_CODE: u64 = 0x10000;

#[uefi::entry]
fn main() -> Status {
    logging::init_logging();

    info!("Booting {BOOT_GUARD_NAME} {BOOT_GUARD_VERSION}");

    let volumes = match volumes::enumerate_volumes() {
        Ok(volumes) => volumes,
        Err(error) => {
            error!("{error}");
            boot::stall(STALL_ON_ERROR_TIME);
            return Status::LOAD_ERROR;
        }
    };

    let mut platform = platform::UefiPlatform::new(volumes);
    let mut params = LoaderParams::default();
    match load_config(&mut platform, &mut params) {
        LoadVerdict::Success => {}
        LoadVerdict::PartiallyCorrupted => {
            warn!("Parts of the environment are corrupted; booting the best surviving config")
        }
        LoadVerdict::ConfigError => {
            error!("No viable boot configuration was found");
            boot::stall(STALL_ON_ERROR_TIME);
            return Status::LOAD_ERROR;
        }
    }

    // A timeout of zero leaves the watchdog disarmed; otherwise a payload
    // that hangs before servicing it resets into this selector again.
    if let Err(error) = boot::set_watchdog_timer(params.timeout as usize, WATCHDOG_CODE, None) {
        warn!("Could not arm the boot watchdog: {}", error.status());
    }

    if let Err(error) = handoff::launch(&params) {
        error!("{error}");
        boot::stall(STALL_ON_ERROR_TIME);
        return Status::LOAD_ERROR;
    }

    Status::SUCCESS
}

#[cfg_attr(not(test), panic_handler)]
#[cfg_attr(test, expect(dead_code))]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
    if uefi::table::system_table_boot().is_some() {
        let _ = with_stderr(|stderr| writeln!(stderr, "{info}"));
        let _ = with_stdout(|stdout| writeln!(stdout, "{info}"));
    }

    loop {
        core::hint::spin_loop()
    }
}
