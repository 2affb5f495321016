//! The capability seam between the selector core and the host firmware.

use alloc::vec::Vec;
use core::{error, fmt};

/// How the config file on a volume should be opened.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum OpenMode {
    /// Read access only.
    Read,
    /// Read and write access, for state-transition write-backs.
    ReadWrite,
}

/// A raw status code reported by a failed platform operation.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct PlatformError(pub usize);

impl PlatformError {
    /// The status reported when an allocation cannot be satisfied.
    pub const OUT_OF_RESOURCES: Self = Self(9);
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "platform status {:#x}", self.0)
    }
}

impl error::Error for PlatformError {}

/// The operations the selector needs from the surrounding firmware.
///
/// Every operation is a named seam: each can be made to fail independently by
/// a test harness, and the selection path must degrade per its contract
/// whichever one does. The volume list behind the indices is owned by the
/// platform and stays stable for the duration of one selection.
pub trait Platform {
    /// Handle to an open config file.
    type File;

    /// The number of volumes visible to the firmware.
    fn volume_count(&self) -> usize;

    /// Allocates the scratch list that will hold candidate volume indices.
    fn allocate_part_list(&mut self, capacity: usize) -> Result<Vec<usize>, PlatformError> {
        let mut list = Vec::new();
        list.try_reserve(capacity)
            .map_err(|_| PlatformError::OUT_OF_RESOURCES)?;
        Ok(list)
    }

    /// Fills `parts` with the indices of volumes holding a config file.
    fn enumerate_cfg_parts(&mut self, parts: &mut Vec<usize>) -> Result<(), PlatformError>;

    /// Removes disallowed entries from `parts` in place, e.g. partitions
    /// residing on a disk the firmware did not boot from.
    fn filter_cfg_parts(&mut self, parts: &mut Vec<usize>);

    /// Whether the volume is the one the firmware itself booted from.
    fn is_on_boot_volume(&self, volume_index: usize) -> bool;

    /// Opens the config file on the volume.
    fn open_cfg_file(
        &mut self,
        volume_index: usize,
        mode: OpenMode,
    ) -> Result<Self::File, PlatformError>;

    /// Reads up to `buffer.len()` bytes, returning the number actually read.
    fn read_cfg_file(
        &mut self,
        file: &mut Self::File,
        buffer: &mut [u8],
    ) -> Result<usize, PlatformError>;

    /// Writes `buffer`, returning the number of bytes actually written.
    fn write_cfg_file(
        &mut self,
        file: &mut Self::File,
        buffer: &[u8],
    ) -> Result<usize, PlatformError>;

    /// Closes the config file.
    fn close_cfg_file(
        &mut self,
        volume_index: usize,
        file: Self::File,
    ) -> Result<(), PlatformError>;

    /// Computes the IEEE CRC-32 of `bytes`.
    fn calculate_crc32(&mut self, bytes: &[u8]) -> Result<u32, PlatformError>;
}
