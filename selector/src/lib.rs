//! Redundant boot-configuration selection.
//!
//! During early startup several copies of the boot environment record live on
//! distinct config partitions. This crate ranks the readable copies, advances
//! the A/B update state machine (marking a fresh install as under test, or a
//! failed test as failed), and hands the chosen record's loader parameters
//! back to the firmware front-end.
//!
//! All interaction with the host firmware goes through the [`Platform`]
//! capability trait, so the whole selection path runs unmodified under a test
//! double.

#![no_std]

extern crate alloc;

use alloc::vec::Vec;
use core::fmt::{self, Write};

pub mod platform;
pub mod rank;
pub mod read;
pub mod select;
pub mod transition;

pub use platform::{OpenMode, Platform, PlatformError};
pub use read::ReadConfigError;
pub use select::load_config;
pub use transition::WriteConfigError;

/// The parameters handed to the loader for the chosen configuration.
///
/// The string fields are owned, NUL-terminated UCS-2 copies of the chosen
/// record's fields; they outlive the selection. On a
/// [`LoadVerdict::ConfigError`] the parameters are left untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoaderParams {
    /// The path of the payload to boot.
    pub payload_path: Vec<u16>,
    /// The load options handed to the payload.
    pub payload_options: Vec<u16>,
    /// The watchdog timeout, in seconds.
    pub timeout: u16,
}

/// The summary outcome of one selection run.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LoadVerdict {
    /// A record was chosen and no anomaly occurred.
    Success,
    /// A record was chosen, but some volume misbehaved along the way.
    PartiallyCorrupted,
    /// No viable record exists; the loader parameters were not assigned.
    ConfigError,
}

/// Displays a NUL-terminated UCS-2 string lossily.
pub struct DisplayUcs2<'units>(pub &'units [u16]);

impl fmt::Display for DisplayUcs2<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let units = self.0.iter().copied().take_while(|unit| *unit != 0);
        for ch in core::char::decode_utf16(units) {
            f.write_char(ch.unwrap_or(char::REPLACEMENT_CHARACTER))?;
        }

        Ok(())
    }
}

/// Copies a fixed-length UCS-2 field into an owned NUL-terminated string.
fn duplicate_ucs2(string: &[u16]) -> Vec<u16> {
    let length = string
        .iter()
        .position(|unit| *unit == 0)
        .unwrap_or(string.len());

    let mut owned = Vec::with_capacity(length + 1);
    owned.extend_from_slice(&string[..length]);
    owned.push(0);
    owned
}
