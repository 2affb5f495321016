//! Wrappers for decoding, mutating, and re-encoding boot environment records.

#![no_std]

use core::{error, fmt, mem};

use env_raw::{RawEnvData, UState, ENV_CRC_COVERED_SIZE, ENV_DATA_SIZE, ENV_STRING_LENGTH};

/// One boot environment record, held as its full on-disk block.
///
/// Field accessors decode little-endian values in place, and setters re-encode
/// them, so a record read from disk round-trips byte-identically apart from
/// the fields the caller changes. The opaque user-variable area is carried
/// through untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvData {
    block: [u8; ENV_DATA_SIZE],
}

impl EnvData {
    /// Returns an all-zero record: revision `REVISION_FAILED`, `ustate`
    /// [`UState::OK`], empty strings, and a stored CRC of zero.
    pub const fn zeroed() -> Self {
        Self {
            block: [0; ENV_DATA_SIZE],
        }
    }

    /// Parses the slice into an owned record if it holds exactly one record.
    pub fn parse(slice: &[u8]) -> Result<Self, ParseEnvDataError> {
        if slice.len() != ENV_DATA_SIZE {
            return Err(ParseEnvDataError::BadLength { length: slice.len() });
        }

        let mut envdata = Self::zeroed();
        envdata.block.copy_from_slice(slice);
        Ok(envdata)
    }

    /// The full on-disk block of this record.
    pub fn as_bytes(&self) -> &[u8; ENV_DATA_SIZE] {
        &self.block
    }

    /// The full on-disk block of this record, for reading into from a file.
    pub fn as_bytes_mut(&mut self) -> &mut [u8; ENV_DATA_SIZE] {
        &mut self.block
    }

    /// The leading bytes of the record covered by the trailing CRC.
    pub fn crc_covered(&self) -> &[u8] {
        &self.block[..ENV_CRC_COVERED_SIZE]
    }

    /// The CRC-32 stored in the trailing field of the record.
    pub fn stored_crc32(&self) -> u32 {
        let crc32 = self.block[mem::offset_of!(RawEnvData, crc32)..]
            .first_chunk::<4>()
            .expect("layout bounds checking failed");
        u32::from_le_bytes(*crc32)
    }

    /// Stores `crc32` in the trailing field of the record.
    pub fn set_crc32(&mut self, crc32: u32) {
        self.put(mem::offset_of!(RawEnvData, crc32), &crc32.to_le_bytes());
    }

    /// Compares a freshly computed CRC against the stored one.
    pub fn verify_crc(&self, calculated: u32) -> Result<(), EnvDataCrcError> {
        let stored = self.stored_crc32();
        if calculated != stored {
            return Err(EnvDataCrcError { calculated, stored });
        }

        Ok(())
    }

    /// The revision of this configuration.
    pub fn revision(&self) -> u32 {
        let revision = self.block[mem::offset_of!(RawEnvData, revision)..]
            .first_chunk::<4>()
            .expect("layout bounds checking failed");
        u32::from_le_bytes(*revision)
    }

    /// Sets the revision of this configuration.
    pub fn set_revision(&mut self, revision: u32) {
        self.put(mem::offset_of!(RawEnvData, revision), &revision.to_le_bytes());
    }

    /// Whether a writer had this record mid-flight when it was persisted.
    pub fn in_progress(&self) -> bool {
        self.block[mem::offset_of!(RawEnvData, in_progress)] != 0
    }

    /// Marks or clears the mid-flight write flag.
    pub fn set_in_progress(&mut self, in_progress: bool) {
        self.block[mem::offset_of!(RawEnvData, in_progress)] = in_progress as u8;
    }

    /// The update state of this configuration.
    pub fn ustate(&self) -> UState {
        UState(self.block[mem::offset_of!(RawEnvData, ustate)])
    }

    /// Sets the update state of this configuration.
    pub fn set_ustate(&mut self, ustate: UState) {
        self.block[mem::offset_of!(RawEnvData, ustate)] = ustate.0;
    }

    /// The watchdog timeout, in seconds.
    pub fn watchdog_timeout_sec(&self) -> u16 {
        let timeout = self.block[mem::offset_of!(RawEnvData, watchdog_timeout_sec)..]
            .first_chunk::<2>()
            .expect("layout bounds checking failed");
        u16::from_le_bytes(*timeout)
    }

    /// Sets the watchdog timeout, in seconds.
    pub fn set_watchdog_timeout_sec(&mut self, timeout: u16) {
        self.put(
            mem::offset_of!(RawEnvData, watchdog_timeout_sec),
            &timeout.to_le_bytes(),
        );
    }

    /// The payload path, as UCS-2 code units.
    pub fn kernelfile(&self) -> [u16; ENV_STRING_LENGTH] {
        self.ucs2_at(mem::offset_of!(RawEnvData, kernelfile))
    }

    /// Sets the payload path, truncating to the field length and NUL-padding.
    pub fn set_kernelfile(&mut self, kernelfile: &[u16]) {
        self.set_ucs2_at(mem::offset_of!(RawEnvData, kernelfile), kernelfile);
    }

    /// The payload load options, as UCS-2 code units.
    pub fn kernelparams(&self) -> [u16; ENV_STRING_LENGTH] {
        self.ucs2_at(mem::offset_of!(RawEnvData, kernelparams))
    }

    /// Sets the payload load options, truncating to the field length and
    /// NUL-padding.
    pub fn set_kernelparams(&mut self, kernelparams: &[u16]) {
        self.set_ucs2_at(mem::offset_of!(RawEnvData, kernelparams), kernelparams);
    }

    /// Forces both string fields to end in a NUL at their last code unit.
    ///
    /// A record whose CRC verifies can still carry unterminated strings;
    /// every record is clamped after a successful read.
    pub fn enforce_nul_termination(&mut self) {
        const LAST: usize = (ENV_STRING_LENGTH - 1) * mem::size_of::<u16>();

        self.put(mem::offset_of!(RawEnvData, kernelfile) + LAST, &[0, 0]);
        self.put(mem::offset_of!(RawEnvData, kernelparams) + LAST, &[0, 0]);
    }

    fn ucs2_at(&self, offset: usize) -> [u16; ENV_STRING_LENGTH] {
        let mut string = [0u16; ENV_STRING_LENGTH];
        for (ix, unit) in string.iter_mut().enumerate() {
            let bytes = self.block[offset + ix * mem::size_of::<u16>()..]
                .first_chunk::<2>()
                .expect("layout bounds checking failed");
            *unit = u16::from_le_bytes(*bytes);
        }

        string
    }

    fn set_ucs2_at(&mut self, offset: usize, string: &[u16]) {
        for ix in 0..ENV_STRING_LENGTH {
            let unit = string.get(ix).copied().unwrap_or(0);
            self.put(offset + ix * mem::size_of::<u16>(), &unit.to_le_bytes());
        }
    }

    fn put(&mut self, offset: usize, bytes: &[u8]) {
        self.block[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

impl Default for EnvData {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl fmt::Debug for EnvData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug_struct = f.debug_struct("EnvData");

        debug_struct.field("revision", &self.revision());
        debug_struct.field("in_progress", &self.in_progress());
        debug_struct.field("ustate", &self.ustate());
        debug_struct.field("watchdog_timeout_sec", &self.watchdog_timeout_sec());
        debug_struct.field("crc32", &self.stored_crc32());

        debug_struct.finish_non_exhaustive()
    }
}

/// Various errors that can occur while parsing an [`EnvData`].
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ParseEnvDataError {
    /// The given slice does not hold exactly one record.
    BadLength {
        /// The length of the given slice.
        length: usize,
    },
}

impl fmt::Display for ParseEnvDataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadLength { length } => write!(
                f,
                "environment record has wrong size: {length} bytes instead of {ENV_DATA_SIZE}"
            ),
        }
    }
}

impl error::Error for ParseEnvDataError {}

/// A freshly computed CRC-32 did not match the one stored in the record.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub struct EnvDataCrcError {
    /// The CRC-32 computed over the covered bytes of the record.
    pub calculated: u32,
    /// The CRC-32 stored in the trailing field of the record.
    pub stored: u32,
}

impl fmt::Display for EnvDataCrcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CRC32 error in environment data: calculated {:x}, stored {:x}",
            self.calculated, self.stored
        )
    }
}

impl error::Error for EnvDataCrcError {}
