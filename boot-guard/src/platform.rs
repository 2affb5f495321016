//! The UEFI implementation of the selector's platform seam.

use alloc::vec::Vec;

use selector::{OpenMode, Platform, PlatformError};
use uefi::{
    boot,
    cstr16,
    proto::media::{
        file::{File, FileAttribute, FileMode, RegularFile},
        fs::SimpleFileSystem,
    },
    CStr16, Status,
};

use crate::volumes::Volume;

/// The well-known name of the environment file on each config partition.
const CONFIG_FILE_NAME: &CStr16 = cstr16!("BGENV.DAT");

/// The firmware-backed [`Platform`]: volumes are SimpleFileSystem handles and
/// the CRC comes from boot services.
pub struct UefiPlatform {
    volumes: Vec<Volume>,
}

impl UefiPlatform {
    pub fn new(volumes: Vec<Volume>) -> Self {
        Self { volumes }
    }
}

fn status_code(status: Status) -> PlatformError {
    PlatformError(status.0)
}

impl Platform for UefiPlatform {
    type File = RegularFile;

    fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn enumerate_cfg_parts(&mut self, parts: &mut Vec<usize>) -> Result<(), PlatformError> {
        for ix in 0..self.volumes.len() {
            // A volume qualifies when the environment file opens at all; its
            // content is judged later, during ranking.
            if let Ok(file) = self.open_cfg_file(ix, OpenMode::Read) {
                let _ = self.close_cfg_file(ix, file);
                parts.push(ix);
            }
        }

        Ok(())
    }

    fn filter_cfg_parts(&mut self, parts: &mut Vec<usize>) {
        parts.retain(|&ix| self.volumes[ix].on_boot_disk);
    }

    fn is_on_boot_volume(&self, volume_index: usize) -> bool {
        self.volumes[volume_index].on_boot_volume
    }

    fn open_cfg_file(
        &mut self,
        volume_index: usize,
        mode: OpenMode,
    ) -> Result<RegularFile, PlatformError> {
        let mode = match mode {
            OpenMode::Read => FileMode::Read,
            OpenMode::ReadWrite => FileMode::ReadWrite,
        };

        let mut filesystem =
            boot::open_protocol_exclusive::<SimpleFileSystem>(self.volumes[volume_index].handle)
                .map_err(|error| status_code(error.status()))?;
        let mut root = filesystem
            .open_volume()
            .map_err(|error| status_code(error.status()))?;

        root.open(CONFIG_FILE_NAME, mode, FileAttribute::empty())
            .map_err(|error| status_code(error.status()))?
            .into_regular_file()
            .ok_or(status_code(Status::INVALID_PARAMETER))
    }

    fn read_cfg_file(
        &mut self,
        file: &mut RegularFile,
        buffer: &mut [u8],
    ) -> Result<usize, PlatformError> {
        file.read(buffer).map_err(|error| status_code(error.status()))
    }

    fn write_cfg_file(
        &mut self,
        file: &mut RegularFile,
        buffer: &[u8],
    ) -> Result<usize, PlatformError> {
        match file.write(buffer) {
            Ok(()) => Ok(buffer.len()),
            Err(error) => Err(status_code(error.status())),
        }
    }

    fn close_cfg_file(
        &mut self,
        _volume_index: usize,
        file: RegularFile,
    ) -> Result<(), PlatformError> {
        // The file protocol defines Close as always succeeding; the handle
        // is released when it drops.
        drop(file);
        Ok(())
    }

    fn calculate_crc32(&mut self, bytes: &[u8]) -> Result<u32, PlatformError> {
        boot::calculate_crc32(bytes).map_err(|error| status_code(error.status()))
    }
}
