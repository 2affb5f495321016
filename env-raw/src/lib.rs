//! Definitions for the on-disk boot environment record.

#![no_std]

use core::mem;

/// The number of UCS-2 code units in each environment string field.
pub const ENV_STRING_LENGTH: usize = 255;

/// The size, in bytes, of the opaque user-variable area carried inside each
/// environment record.
pub const ENV_MEM_USERVARS: usize = 131072;

/// The number of redundant config partitions a healthy installation carries.
pub const ENV_NUM_CONFIG_PARTS: usize = 2;

/// The revision sentinel marking a record whose update was rejected.
///
/// Compares lower than every live revision, so a failed record sinks in
/// ranking.
pub const REVISION_FAILED: u32 = 0;

/// The update state of an environment record.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct UState(pub u8);

impl UState {
    /// The configuration has been verified and is in regular use.
    pub const OK: Self = Self(0);
    /// The configuration was staged by an update and has never been booted.
    pub const INSTALLED: Self = Self(1);
    /// The current boot is the probation run for this configuration.
    pub const TESTING: Self = Self(2);
    /// The configuration failed its probation run and was rejected.
    pub const FAILED: Self = Self(3);
}

/// The on-disk layout of one environment record.
///
/// Stored packed, in little-endian field order, at a well-known path on each
/// config partition. The trailing [`crc32`][RawEnvData::crc32] covers every
/// preceding byte.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct RawEnvData {
    /// The path of the payload to boot, as a NUL-terminated UCS-2 string.
    pub kernelfile: [u16; ENV_STRING_LENGTH],
    /// The load options handed to the payload, as a NUL-terminated UCS-2
    /// string.
    pub kernelparams: [u16; ENV_STRING_LENGTH],
    /// Nonzero while a writer has this record mid-flight.
    pub in_progress: u8,
    /// The update state of this configuration.
    pub ustate: u8,
    /// The watchdog timeout, in seconds, armed before the payload runs.
    pub watchdog_timeout_sec: u16,
    /// The configuration revision; higher is newer, [`REVISION_FAILED`] is
    /// the known-bad sentinel.
    pub revision: u32,
    /// Opaque user-variable area; never interpreted by the selector.
    pub userdata: [u8; ENV_MEM_USERVARS],
    /// IEEE CRC-32 over all preceding bytes of the record.
    pub crc32: u32,
}

/// The size, in bytes, of one environment record on disk.
pub const ENV_DATA_SIZE: usize = mem::size_of::<RawEnvData>();

/// The number of leading bytes of a record covered by its trailing CRC.
pub const ENV_CRC_COVERED_SIZE: usize = ENV_DATA_SIZE - mem::size_of::<u32>();
