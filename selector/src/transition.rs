//! Advancing the A/B update state machine after ranking.

use alloc::boxed::Box;
use core::{error, fmt};

use env_raw::{UState, ENV_DATA_SIZE, REVISION_FAILED};
use log::error;

use crate::platform::{OpenMode, Platform, PlatformError};
use crate::rank::{Candidate, SlotPool};

/// Applies the update-state transitions to the ranked slots and returns the
/// candidate to boot with, or [`None`] when no viable candidate exists.
///
/// A leader still marked in_progress is not viable: the writer died mid-write
/// and the record's intent is unknown. A TESTING leader means the previous
/// probation boot never verified itself; it is demoted on disk and the
/// runner-up boots instead. An INSTALLED leader is entering its probation
/// boot and is marked TESTING on disk first.
pub fn apply<P: Platform>(
    platform: &mut P,
    errored: &mut bool,
    slots: &mut SlotPool,
) -> Option<Box<Candidate>> {
    let next = slots[0].take();
    let prev = slots[1].take();

    let mut latest = match next {
        Some(latest) if !latest.envdata.in_progress() => latest,
        _ => {
            error!("Could not find any valid config partition.");
            return None;
        }
    };

    if latest.envdata.ustate() == UState::TESTING {
        // The update was already booted once without being verified: mark it
        // failed and give it the zero revision so it sinks in future runs.
        latest.envdata.set_ustate(UState::FAILED);
        latest.envdata.set_revision(REVISION_FAILED);
        if write_config(platform, &mut latest).is_err() {
            *errored = true;
        }

        // Boot with the configuration that was active before, if possible.
        let Some(prev) = prev else {
            error!("Could not find previous valid config partition.");
            return None;
        };

        return Some(prev);
    }

    if latest.envdata.ustate() == UState::INSTALLED {
        // First boot of this configuration: this run is its probation.
        latest.envdata.set_ustate(UState::TESTING);
        if write_config(platform, &mut latest).is_err() {
            *errored = true;
        }
    }

    Some(latest)
}

/// Writes the candidate's record back to its volume, recomputing the CRC
/// before the buffer is handed to the file layer.
fn write_config<P: Platform>(
    platform: &mut P,
    candidate: &mut Candidate,
) -> Result<(), WriteConfigError> {
    let volume_index = candidate.volume_index;

    let mut file = match platform.open_cfg_file(volume_index, OpenMode::ReadWrite) {
        Ok(file) => file,
        Err(status) => {
            error!(
                "Could not open environment file on system partition {volume_index}: {status}"
            );
            return Err(WriteConfigError::Open(status));
        }
    };

    let written = platform
        .calculate_crc32(candidate.envdata.crc_covered())
        .map_err(WriteConfigError::Crc)
        .and_then(|crc32| {
            candidate.envdata.set_crc32(crc32);
            platform
                .write_cfg_file(&mut file, candidate.envdata.as_bytes())
                .map_err(WriteConfigError::Write)
        });

    let written = match written {
        Ok(written) => written,
        Err(failure) => {
            error!("Cannot write environment to file: {failure}");
            let _ = platform.close_cfg_file(volume_index, file);
            return Err(failure);
        }
    };

    if written != ENV_DATA_SIZE {
        let failure = WriteConfigError::ShortWrite { written };
        error!("Cannot write environment to file: {failure}");
        let _ = platform.close_cfg_file(volume_index, file);
        return Err(failure);
    }

    if let Err(status) = platform.close_cfg_file(volume_index, file) {
        error!("Could not close environment config file.");
        return Err(WriteConfigError::Close(status));
    }

    Ok(())
}

/// Various errors that can occur while writing an environment record back.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum WriteConfigError {
    /// The config file could not be opened for writing.
    Open(PlatformError),
    /// The platform failed to compute the record's CRC.
    Crc(PlatformError),
    /// The config file could not be written.
    Write(PlatformError),
    /// Fewer bytes than one record were written.
    ShortWrite {
        /// The number of bytes the write returned.
        written: usize,
    },
    /// The config file could not be closed after a successful write.
    Close(PlatformError),
}

impl fmt::Display for WriteConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open(status) => write!(f, "could not open environment file: {status}"),
            Self::Crc(status) => write!(f, "could not compute environment CRC32: {status}"),
            Self::Write(status) => write!(f, "could not write environment file: {status}"),
            Self::ShortWrite { written } => write!(
                f,
                "short environment write: {written} bytes instead of {ENV_DATA_SIZE}"
            ),
            Self::Close(status) => {
                write!(f, "could not close environment file after writing: {status}")
            }
        }
    }
}

impl error::Error for WriteConfigError {}
