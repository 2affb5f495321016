//! The selection orchestrator.

use alloc::boxed::Box;

use env::EnvData;
use env_raw::ENV_NUM_CONFIG_PARTS;
use log::{error, info, warn};

use crate::platform::Platform;
use crate::rank::{self, Candidate, SlotPool, ENV_SLOTS};
use crate::read::read_config;
use crate::{duplicate_ucs2, transition, DisplayUcs2, LoadVerdict, LoaderParams};

/// Chooses the configuration to boot with.
///
/// Enumerates and filters the config partitions, ranks every readable record,
/// applies the update-state transitions, and copies the chosen record's
/// loader parameters into `params`. On [`LoadVerdict::ConfigError`] the
/// parameters are left untouched.
pub fn load_config<P: Platform>(platform: &mut P, params: &mut LoaderParams) -> LoadVerdict {
    let volume_count = platform.volume_count();
    if volume_count == 0 {
        error!("No volumes available for config partitions.");
        return LoadVerdict::ConfigError;
    }

    let mut errored = false;

    let mut config_volumes = match platform.allocate_part_list(volume_count) {
        Ok(config_volumes) => config_volumes,
        Err(status) => {
            error!("Could not allocate memory for config partition mapping: {status}");
            return LoadVerdict::ConfigError;
        }
    };

    if let Err(status) = platform.enumerate_cfg_parts(&mut config_volumes) {
        error!("Could not enumerate config partitions: {status}");
        return LoadVerdict::ConfigError;
    }

    platform.filter_cfg_parts(&mut config_volumes);

    if config_volumes.len() != ENV_NUM_CONFIG_PARTS {
        warn!(
            "Unexpected config partitions: found {}, but expected {}.",
            config_volumes.len(),
            ENV_NUM_CONFIG_PARTS
        );
        // A valid config may still be found among the survivors.
        errored = true;
    }

    let mut slots: SlotPool = [None, None, None];

    for (ix, &volume_index) in config_volumes.iter().enumerate() {
        // Reuse the candidate displaced into the scratch slot, if any.
        let mut candidate = match slots[ENV_SLOTS - 1].take() {
            Some(candidate) => candidate,
            None => Box::new(Candidate {
                volume_index,
                envdata: EnvData::zeroed(),
            }),
        };
        candidate.volume_index = volume_index;

        info!("Reading config file on volume {volume_index}.");

        let read = read_config(platform, &mut errored, volume_index, &mut candidate.envdata);
        slots[ENV_SLOTS - 1] = Some(candidate);

        if read.is_err() {
            warn!("Could not read environment file on config partition {ix}");
            continue;
        }

        let candidate = slots[ENV_SLOTS - 1]
            .as_deref_mut()
            .expect("scratch slot was just filled");
        candidate.envdata.enforce_nul_termination();

        for slot_ix in (0..ENV_SLOTS - 1).rev() {
            rank::sift(platform, &mut slots, slot_ix);
        }
    }

    let Some(latest) = transition::apply(platform, &mut errored, &mut slots) else {
        return LoadVerdict::ConfigError;
    };

    params.payload_path = duplicate_ucs2(&latest.envdata.kernelfile());
    params.payload_options = duplicate_ucs2(&latest.envdata.kernelparams());
    params.timeout = latest.envdata.watchdog_timeout_sec();

    info!("Choosing config on volume {}.", latest.volume_index);
    info!("Config Revision: {}:", latest.envdata.revision());
    info!(" ustate: {}", latest.envdata.ustate().0);
    info!(" kernel: {}", DisplayUcs2(&params.payload_path));
    info!(" args: {}", DisplayUcs2(&params.payload_options));
    info!(" timeout: {} seconds", params.timeout);

    if errored {
        LoadVerdict::PartiallyCorrupted
    } else {
        LoadVerdict::Success
    }
}
