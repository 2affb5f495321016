//! Loading one environment record from a config partition.

use core::{error, fmt};

use env::{EnvData, EnvDataCrcError};
use env_raw::ENV_DATA_SIZE;
use log::{error, warn};

use crate::platform::{OpenMode, Platform, PlatformError};

/// Reads the record on `volume_index` into `envdata`.
///
/// Any hard failure leaves the volume out of the ranking; the caller skips it.
/// `errored` is additionally raised for every anomaly, including a failed
/// close after a successful read, which does not invalidate the record.
pub fn read_config<P: Platform>(
    platform: &mut P,
    errored: &mut bool,
    volume_index: usize,
    envdata: &mut EnvData,
) -> Result<(), ReadConfigError> {
    let mut file = match platform.open_cfg_file(volume_index, OpenMode::Read) {
        Ok(file) => file,
        Err(status) => {
            error!("Could not open environment file: {status}");
            *errored = true;
            return Err(ReadConfigError::Open(status));
        }
    };

    let read = platform.read_cfg_file(&mut file, envdata.as_bytes_mut());

    if let Err(status) = platform.close_cfg_file(volume_index, file) {
        warn!("Could not close environment config file: {status}");
        *errored = true;
        // Only fail if the read did not succeed.
    }

    let length = match read {
        Ok(length) => length,
        Err(status) => {
            error!("Cannot read environment file: {status}");
            *errored = true;
            return Err(ReadConfigError::Read(status));
        }
    };

    if length != ENV_DATA_SIZE {
        error!("Environment file has wrong size");
        *errored = true;
        return Err(ReadConfigError::BadLength { length });
    }

    let calculated = match platform.calculate_crc32(envdata.crc_covered()) {
        Ok(calculated) => calculated,
        Err(status) => {
            error!("Unable to compute CRC32: {status}");
            *errored = true;
            return Err(ReadConfigError::Crc(status));
        }
    };

    if let Err(mismatch) = envdata.verify_crc(calculated) {
        error!("{mismatch}");
        *errored = true;
        return Err(ReadConfigError::CrcMismatch(mismatch));
    }

    Ok(())
}

/// Various errors that can occur while reading an environment record.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ReadConfigError {
    /// The config file could not be opened.
    Open(PlatformError),
    /// The config file could not be read.
    Read(PlatformError),
    /// The config file does not hold exactly one record.
    BadLength {
        /// The number of bytes the read returned.
        length: usize,
    },
    /// The platform failed to compute the record's CRC.
    Crc(PlatformError),
    /// The computed CRC does not match the stored one.
    CrcMismatch(EnvDataCrcError),
}

impl fmt::Display for ReadConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(status) => write!(f, "could not open environment file: {status}"),
            Self::Read(status) => write!(f, "could not read environment file: {status}"),
            Self::BadLength { length } => write!(
                f,
                "environment file has wrong size: read {length} bytes instead of {ENV_DATA_SIZE}"
            ),
            Self::Crc(status) => write!(f, "could not compute environment CRC32: {status}"),
            Self::CrcMismatch(mismatch) => mismatch.fmt(f),
        }
    }
}

impl error::Error for ReadConfigError {}
