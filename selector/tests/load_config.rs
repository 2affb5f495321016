//! End-to-end selection scenarios driven through a scripted platform.
//!
//! Every scenario runs ten times with the volume table shuffled differently,
//! so the outcome is verified across input permutations. Errors are
//! optionally injected to cover the failure paths: a census pass counts the
//! injectable platform calls, then one run per call injects a failure at
//! exactly that point.

use env::EnvData;
use env_raw::{UState, ENV_DATA_SIZE, ENV_NUM_CONFIG_PARTS, REVISION_FAILED};
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use selector::{load_config, LoadVerdict, LoaderParams, OpenMode, Platform, PlatformError};

/// Offset of the first usable volume, to improve detection of errors
/// indexing the volume array.
const VOLUME_OFFSET: usize = 997;

const SHUFFLE_RUNS: u64 = 10;

/// Which disk a test volume pretends to live on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Disk {
    BootVolume,
    NonBootVolume,
    NonBootDisk,
}

#[derive(Clone)]
struct TestVolume {
    /// Whether the volume carries a config file at all.
    present: bool,
    disk: Disk,
    /// The record served on reads; `None` reads back as an empty file.
    envdata: Option<EnvData>,
}

impl TestVolume {
    fn absent() -> Self {
        Self {
            present: false,
            disk: Disk::NonBootVolume,
            envdata: None,
        }
    }
}

struct TestFile {
    volume_index: usize,
}

#[derive(Default)]
struct ErrorInjection {
    census: usize,
    inject_at: usize,
}

impl ErrorInjection {
    /// Counts one injectable point, failing when the countdown lands on it.
    fn step(&mut self) -> Result<(), PlatformError> {
        match self.inject_at {
            1 => {
                self.inject_at = 0;
                return Err(PlatformError(2));
            }
            0 => {}
            _ => self.inject_at -= 1,
        }

        self.census += 1;
        Ok(())
    }
}

struct TestPlatform {
    volumes: Vec<TestVolume>,
    injection: ErrorInjection,
    open_files: usize,
    write_count: usize,
    wrote: Option<(usize, EnvData)>,
}

impl TestPlatform {
    fn new(volumes: Vec<TestVolume>) -> Self {
        Self {
            volumes,
            injection: ErrorInjection::default(),
            open_files: 0,
            write_count: 0,
            wrote: None,
        }
    }
}

impl Platform for TestPlatform {
    type File = TestFile;

    fn volume_count(&self) -> usize {
        self.volumes.len()
    }

    fn allocate_part_list(&mut self, capacity: usize) -> Result<Vec<usize>, PlatformError> {
        self.injection.step()?;
        Ok(Vec::with_capacity(capacity))
    }

    fn enumerate_cfg_parts(&mut self, parts: &mut Vec<usize>) -> Result<(), PlatformError> {
        self.injection.step()?;
        for (ix, volume) in self.volumes.iter().enumerate() {
            if volume.present {
                parts.push(ix);
            }
        }

        Ok(())
    }

    fn filter_cfg_parts(&mut self, parts: &mut Vec<usize>) {
        parts.retain(|&ix| self.volumes[ix].disk != Disk::NonBootDisk);
    }

    fn is_on_boot_volume(&self, volume_index: usize) -> bool {
        self.volumes[volume_index].disk == Disk::BootVolume
    }

    fn open_cfg_file(
        &mut self,
        volume_index: usize,
        _mode: OpenMode,
    ) -> Result<TestFile, PlatformError> {
        self.injection.step()?;
        self.open_files += 1;
        Ok(TestFile { volume_index })
    }

    fn read_cfg_file(
        &mut self,
        file: &mut TestFile,
        buffer: &mut [u8],
    ) -> Result<usize, PlatformError> {
        self.injection.step()?;

        match &self.volumes[file.volume_index].envdata {
            Some(envdata) if envdata.as_bytes().len() <= buffer.len() => {
                let bytes = envdata.as_bytes();
                buffer[..bytes.len()].copy_from_slice(bytes);
                Ok(bytes.len())
            }
            _ => Ok(0),
        }
    }

    fn write_cfg_file(
        &mut self,
        file: &mut TestFile,
        buffer: &[u8],
    ) -> Result<usize, PlatformError> {
        self.injection.step()?;

        if buffer.len() != ENV_DATA_SIZE {
            return Err(PlatformError(21));
        }

        self.write_count += 1;
        self.wrote = Some((
            file.volume_index,
            EnvData::parse(buffer).expect("write-back is always one full record"),
        ));
        Ok(buffer.len())
    }

    fn close_cfg_file(
        &mut self,
        _volume_index: usize,
        file: TestFile,
    ) -> Result<(), PlatformError> {
        // The handle is released even when the close reports failure.
        drop(file);
        self.open_files -= 1;
        self.injection.step()
    }

    fn calculate_crc32(&mut self, bytes: &[u8]) -> Result<u32, PlatformError> {
        self.injection.step()?;
        Ok(crc32fast::hash(bytes))
    }
}

fn ucs2(s: &str) -> Vec<u16> {
    s.encode_utf16().chain([0]).collect()
}

fn envdata(
    revision: u32,
    in_progress: bool,
    ustate: UState,
    watchdog_timeout_sec: u16,
    kernelfile: &str,
    kernelparams: &str,
) -> EnvData {
    let mut envdata = EnvData::zeroed();
    envdata.set_revision(revision);
    envdata.set_in_progress(in_progress);
    envdata.set_ustate(ustate);
    envdata.set_watchdog_timeout_sec(watchdog_timeout_sec);
    envdata.set_kernelfile(&ucs2(kernelfile));
    envdata.set_kernelparams(&ucs2(kernelparams));
    envdata.set_crc32(crc32fast::hash(envdata.crc_covered()));
    envdata
}

/// Builds the volume table: `parts` usable volumes after a block of unusable
/// ones, each taking the matching scenario (the last one repeats), then shuffled
/// so the tests cover a variety of permutations.
fn test_volumes(rng: &mut SmallRng, parts: usize, scenarios: &[(Option<&EnvData>, Disk)]) -> Vec<TestVolume> {
    let mut volumes = vec![TestVolume::absent(); VOLUME_OFFSET];

    for ix in 0..parts {
        let (envdata, disk) = scenarios[ix.min(scenarios.len() - 1)];
        volumes.push(TestVolume {
            present: true,
            disk,
            envdata: envdata.cloned(),
        });
    }

    volumes.shuffle(rng);
    volumes
}

fn run(platform: &mut TestPlatform) -> (LoadVerdict, LoaderParams) {
    let mut params = LoaderParams::default();
    let verdict = load_config(platform, &mut params);
    assert_eq!(platform.open_files, 0, "selection leaked a file handle");
    (verdict, params)
}

#[test]
fn empty_volume_set_is_a_config_error() {
    let mut platform = TestPlatform::new(Vec::new());
    let (verdict, params) = run(&mut platform);

    assert_eq!(verdict, LoadVerdict::ConfigError);
    assert_eq!(params, LoaderParams::default());
    assert_eq!(platform.write_count, 0);
}

#[test]
fn no_config_data_anywhere_is_a_config_error() {
    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            ENV_NUM_CONFIG_PARTS,
            &[(None, Disk::NonBootVolume)],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::ConfigError);
        assert_eq!(params, LoaderParams::default());
        assert_eq!(platform.write_count, 0);
    }
}

#[test]
fn corrupted_records_everywhere_is_a_config_error() {
    let mut corrupted = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");
    corrupted.set_crc32(corrupted.stored_crc32() ^ 1);

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            ENV_NUM_CONFIG_PARTS,
            &[(Some(&corrupted), Disk::NonBootVolume)],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, _) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::ConfigError);
        assert_eq!(platform.write_count, 0);
    }
}

#[test]
fn most_recent_revision_is_selected() {
    let active = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");
    let inactive = envdata(1, false, UState::OK, 99, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            ENV_NUM_CONFIG_PARTS,
            &[
                (Some(&active), Disk::NonBootVolume),
                (Some(&inactive), Disk::NonBootVolume),
            ],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::Success);
        assert_eq!(params.payload_path, ucs2("kernelfile"));
        assert_eq!(params.payload_options, ucs2("kernelparams"));
        assert_eq!(params.timeout, 11);
        assert_eq!(platform.write_count, 0);
    }
}

#[test]
fn every_injected_failure_denies_success() {
    let active = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");
    let inactive = envdata(1, false, UState::OK, 99, "", "");
    let scenarios = [
        (Some(&active), Disk::NonBootVolume),
        (Some(&inactive), Disk::NonBootVolume),
    ];

    for seed in 0..SHUFFLE_RUNS {
        // First pass: take a census of the injectable platform calls.
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut platform = TestPlatform::new(test_volumes(&mut rng, ENV_NUM_CONFIG_PARTS, &scenarios));
        let (verdict, _) = run(&mut platform);
        assert_eq!(verdict, LoadVerdict::Success);

        let census = platform.injection.census;
        assert!(census > 0);

        // Knowing the total, inject one error at a time and verify that each
        // is detected.
        for inject_at in (1..=census).rev() {
            let mut rng = SmallRng::seed_from_u64(seed);
            let mut platform =
                TestPlatform::new(test_volumes(&mut rng, ENV_NUM_CONFIG_PARTS, &scenarios));
            platform.injection.inject_at = inject_at;

            let (verdict, _) = run(&mut platform);
            assert_ne!(verdict, LoadVerdict::Success, "injection point {inject_at}");
            assert_eq!(platform.injection.inject_at, 0, "injection point {inject_at} never hit");
        }
    }
}

#[test]
fn single_surviving_copy_still_boots() {
    let active = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(&mut rng, 1, &[(Some(&active), Disk::NonBootVolume)]);

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::PartiallyCorrupted);
        assert_eq!(params.payload_path, ucs2("kernelfile"));
        assert_eq!(params.payload_options, ucs2("kernelparams"));
        assert_eq!(params.timeout, 11);
    }
}

#[test]
fn extra_config_partition_degrades_the_verdict() {
    let active = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");
    let inactive = envdata(1, false, UState::OK, 99, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            ENV_NUM_CONFIG_PARTS + 1,
            &[
                (Some(&active), Disk::NonBootVolume),
                (Some(&inactive), Disk::NonBootVolume),
            ],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::PartiallyCorrupted);
        assert_eq!(params.payload_path, ucs2("kernelfile"));
        assert_eq!(params.timeout, 11);
    }
}

#[test]
fn partitions_on_foreign_disks_are_filtered_out() {
    let active = envdata(2, false, UState::OK, 11, "kernelfile", "kernelparams");
    let inactive = envdata(1, false, UState::OK, 99, "", "");
    // Newest revision of all, but on a disk the firmware did not boot from.
    let other = envdata(3, false, UState::OK, 999, "foreign", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            ENV_NUM_CONFIG_PARTS + 1,
            &[
                (Some(&active), Disk::NonBootVolume),
                (Some(&inactive), Disk::NonBootVolume),
                (Some(&other), Disk::NonBootDisk),
            ],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::Success);
        assert_eq!(params.payload_path, ucs2("kernelfile"));
        assert_eq!(params.timeout, 11);
    }
}

#[test]
fn settled_record_outranks_newer_in_progress_record() {
    let inprogress = envdata(2, true, UState::OK, 11, "", "");
    let active = envdata(1, false, UState::OK, 99, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            2,
            &[
                (Some(&inprogress), Disk::NonBootVolume),
                (Some(&active), Disk::NonBootVolume),
            ],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::Success);
        assert_eq!(params.timeout, 99);
    }
}

#[test]
fn state_ranking_and_transitions() {
    let states = [
        UState::INSTALLED,
        UState::TESTING,
        UState::OK,
        UState::FAILED,
    ];

    for pair in states.windows(2) {
        let first = envdata(1, false, pair[0], 11, "first", "");
        let second = envdata(1, false, pair[1], 99, "second", "");

        for seed in 0..SHUFFLE_RUNS {
            let mut rng = SmallRng::seed_from_u64(seed);
            let volumes = test_volumes(
                &mut rng,
                2,
                &[
                    (Some(&first), Disk::NonBootVolume),
                    (Some(&second), Disk::NonBootVolume),
                ],
            );

            let mut platform = TestPlatform::new(volumes);
            let (verdict, params) = run(&mut platform);

            assert_eq!(verdict, LoadVerdict::Success);

            // A TESTING leader is demoted and the runner-up boots instead.
            let expected = if pair[0] == UState::TESTING {
                "second"
            } else {
                "first"
            };
            assert_eq!(params.payload_path, ucs2(expected));

            match pair[0] {
                UState::INSTALLED => {
                    assert_eq!(platform.write_count, 1);
                    let (volume_index, wrote) = platform.wrote.as_ref().unwrap();
                    assert_eq!(wrote.revision(), 1);
                    assert_eq!(wrote.ustate(), UState::TESTING);
                    wrote
                        .verify_crc(crc32fast::hash(wrote.crc_covered()))
                        .unwrap();

                    let written_to = platform.volumes[*volume_index].envdata.as_ref().unwrap();
                    assert_eq!(written_to.kernelfile(), first.kernelfile());
                }
                UState::TESTING => {
                    assert_eq!(platform.write_count, 1);
                    let (volume_index, wrote) = platform.wrote.as_ref().unwrap();
                    assert_eq!(wrote.revision(), REVISION_FAILED);
                    assert_eq!(wrote.ustate(), UState::FAILED);
                    wrote
                        .verify_crc(crc32fast::hash(wrote.crc_covered()))
                        .unwrap();

                    let written_to = platform.volumes[*volume_index].envdata.as_ref().unwrap();
                    assert_eq!(written_to.kernelfile(), first.kernelfile());
                }
                _ => assert_eq!(platform.write_count, 0),
            }
        }
    }
}

#[test]
fn boot_volume_discriminates_equal_records() {
    let active = envdata(1, false, UState::OK, 11, "", "");
    let inactive = envdata(1, false, UState::OK, 99, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            2,
            &[
                (Some(&active), Disk::BootVolume),
                (Some(&inactive), Disk::NonBootVolume),
            ],
        );

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::Success);
        assert_eq!(params.timeout, 11);
    }
}

#[test]
fn volume_index_discriminates_equal_records() {
    let active = envdata(1, false, UState::OK, 11, "", "");
    let inactive = envdata(1, false, UState::OK, 99, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(
            &mut rng,
            2,
            &[
                (Some(&active), Disk::BootVolume),
                (Some(&inactive), Disk::BootVolume),
            ],
        );

        // The first usable volume in enumeration order must win.
        let expected = volumes
            .iter()
            .find_map(|volume| volume.envdata.as_ref())
            .map(EnvData::watchdog_timeout_sec)
            .unwrap();

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::Success);
        assert_eq!(params.timeout, expected);
    }
}

#[test]
fn all_copies_in_progress_is_a_config_error() {
    let inprogress = envdata(1, true, UState::OK, 11, "", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(&mut rng, 2, &[(Some(&inprogress), Disk::NonBootVolume)]);

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::ConfigError);
        assert_eq!(params, LoaderParams::default());
        assert_eq!(platform.write_count, 0);
    }
}

#[test]
fn demoted_leader_with_no_runner_up_is_a_config_error() {
    let testing = envdata(2, false, UState::TESTING, 11, "kernelfile", "");

    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(&mut rng, 1, &[(Some(&testing), Disk::NonBootVolume)]);

        let mut platform = TestPlatform::new(volumes);
        let (verdict, params) = run(&mut platform);

        assert_eq!(verdict, LoadVerdict::ConfigError);
        assert_eq!(params, LoaderParams::default());

        // The demotion itself is still persisted before the selection fails.
        assert_eq!(platform.write_count, 1);
        let (_, wrote) = platform.wrote.as_ref().unwrap();
        assert_eq!(wrote.ustate(), UState::FAILED);
        assert_eq!(wrote.revision(), REVISION_FAILED);
    }
}

#[test]
fn selection_is_deterministic_under_shuffle() {
    let records: Vec<EnvData> = (1..=3)
        .map(|revision| {
            envdata(
                revision,
                false,
                UState::OK,
                revision as u16,
                "kernelfile",
                "kernelparams",
            )
        })
        .collect();
    let scenarios: Vec<(Option<&EnvData>, Disk)> = records
        .iter()
        .map(|record| (Some(record), Disk::NonBootVolume))
        .collect();

    let mut outcomes = Vec::new();
    for seed in 0..SHUFFLE_RUNS {
        let mut rng = SmallRng::seed_from_u64(seed);
        let volumes = test_volumes(&mut rng, records.len(), &scenarios);

        let mut platform = TestPlatform::new(volumes);
        outcomes.push(run(&mut platform));
    }

    for outcome in &outcomes[1..] {
        assert_eq!(outcome, &outcomes[0]);
    }

    let (verdict, params) = &outcomes[0];
    // Three copies where two are expected: chosen, but flagged.
    assert_eq!(*verdict, LoadVerdict::PartiallyCorrupted);
    assert_eq!(params.timeout, 3);
}
