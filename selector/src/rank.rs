//! Ranking of candidate records into a bounded top-K.

use alloc::boxed::Box;

use env::EnvData;
use env_raw::UState;

use crate::platform::Platform;

/// The number of candidate slots: the top two plus one scratch slot for the
/// volume currently being read.
pub const ENV_SLOTS: usize = 3;

/// The slot pool sifted during selection; index 0 ends up most preferred.
pub type SlotPool = [Option<Box<Candidate>>; ENV_SLOTS];

/// A volume paired with the record read from it.
#[derive(Clone, Debug)]
pub struct Candidate {
    /// The index of the volume the record was read from.
    pub volume_index: usize,
    /// The record itself.
    pub envdata: EnvData,
}

/// Assigns a rank to each of the states. Prefer INSTALLED, then TESTING,
/// over OK, but eschew FAILED and unknown.
fn config_state_ranking(envdata: &EnvData) -> u32 {
    match envdata.ustate() {
        UState::INSTALLED => 0,
        UState::TESTING => 1,
        UState::OK => 2,
        _ => 3,
    }
}

/// Whether `lhs` is strictly preferred over `rhs`.
///
/// Prefer the configuration that is not in_progress, has the highest
/// revision, and has the lower ranked state. If both are equal so far,
/// prefer the copy on the boot volume, otherwise the copy on the first
/// occurring partition. The boot-volume step matters when a backup of the
/// EFI System Partition carries a copy of the config: at equal revision the
/// boot disk's copy must win.
fn outranks<P: Platform + ?Sized>(platform: &P, lhs: &Candidate, rhs: &Candidate) -> bool {
    if lhs.envdata.in_progress() != rhs.envdata.in_progress() {
        return rhs.envdata.in_progress();
    }

    if lhs.envdata.revision() != rhs.envdata.revision() {
        return lhs.envdata.revision() > rhs.envdata.revision();
    }

    let lrank = config_state_ranking(&lhs.envdata);
    let rrank = config_state_ranking(&rhs.envdata);
    if lrank != rrank {
        return lrank < rrank;
    }

    let lbootvolume = platform.is_on_boot_volume(lhs.volume_index);
    let rbootvolume = platform.is_on_boot_volume(rhs.volume_index);
    if lbootvolume != rbootvolume {
        return lbootvolume;
    }

    if lhs.volume_index != rhs.volume_index {
        return lhs.volume_index < rhs.volume_index;
    }

    false
}

/// Compares the slots at `ix` and `ix + 1`, swapping so that the preferred
/// candidate ends up on the left. A present candidate always beats an empty
/// slot.
///
/// Bubbling a freshly read candidate from the scratch slot leftward keeps the
/// pool ordered, so after all volumes are read, index 0 holds the most
/// preferred candidate and index 1 the runner-up.
pub fn sift<P: Platform + ?Sized>(platform: &P, slots: &mut SlotPool, ix: usize) {
    let swap = match (&slots[ix], &slots[ix + 1]) {
        (_, None) => false,
        (None, Some(_)) => true,
        (Some(lhs), Some(rhs)) => outranks(platform, rhs, lhs),
    };

    if swap {
        slots.swap(ix, ix + 1);
    }
}
