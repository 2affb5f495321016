//! Launching the payload named by the chosen configuration.

use alloc::vec;
use core::{error, fmt, mem};

use selector::{DisplayUcs2, LoaderParams};
use uefi::{
    boot::{self, LoadImageSource},
    proto::{
        loaded_image::LoadedImage,
        media::file::{File, FileAttribute, FileInfo, FileMode},
    },
    CStr16, Status,
};

/// Loads the payload named by `params` from the boot volume and starts it.
///
/// Returns only if the payload itself returns.
pub fn launch(params: &LoaderParams) -> Result<(), LaunchError> {
    let path = CStr16::from_u16_with_nul(&params.payload_path)
        .map_err(|_| LaunchError::MalformedPath)?;

    log::info!("Loading payload {}", DisplayUcs2(&params.payload_path));

    let mut filesystem = boot::get_image_file_system(boot::image_handle())
        .map_err(|error| LaunchError::Filesystem(error.status()))?;
    let mut root = filesystem
        .open_volume()
        .map_err(|error| LaunchError::Filesystem(error.status()))?;

    let mut file = root
        .open(path, FileMode::Read, FileAttribute::empty())
        .map_err(|error| LaunchError::Open(error.status()))?
        .into_regular_file()
        .ok_or(LaunchError::NotAFile)?;

    let info = file
        .get_boxed_info::<FileInfo>()
        .map_err(|error| LaunchError::Info(error.status()))?;

    let mut image = vec![0u8; info.file_size() as usize];
    let mut offset = 0;
    while offset < image.len() {
        let read = file
            .read(&mut image[offset..])
            .map_err(|error| LaunchError::Read(error.status()))?;
        if read == 0 {
            return Err(LaunchError::UnexpectedEndOfFile);
        }

        offset += read;
    }

    let image_handle = boot::load_image(
        boot::image_handle(),
        LoadImageSource::FromBuffer {
            buffer: &image,
            file_path: None,
        },
    )
    .map_err(|error| LaunchError::Load(error.status()))?;

    let mut loaded_image = boot::open_protocol_exclusive::<LoadedImage>(image_handle)
        .map_err(|error| LaunchError::Load(error.status()))?;
    let options_size = params.payload_options.len() * mem::size_of::<u16>();
    unsafe {
        loaded_image.set_load_options(
            params.payload_options.as_ptr().cast(),
            options_size as u32,
        )
    };
    drop(loaded_image);

    boot::start_image(image_handle).map_err(|error| LaunchError::Start(error.status()))?;

    Ok(())
}

/// Various errors that can occur while launching the payload.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum LaunchError {
    /// The payload path is not a well-formed NUL-terminated UCS-2 string.
    MalformedPath,
    /// The boot volume's filesystem could not be opened.
    Filesystem(Status),
    /// The payload file could not be opened.
    Open(Status),
    /// The payload path names a directory.
    NotAFile,
    /// The payload file's metadata could not be read.
    Info(Status),
    /// The payload file could not be read.
    Read(Status),
    /// The payload file ended before its recorded size.
    UnexpectedEndOfFile,
    /// The firmware refused to load the payload image.
    Load(Status),
    /// The firmware failed to start the payload image.
    Start(Status),
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPath => f.write_str("payload path is not a valid UCS-2 string"),
            Self::Filesystem(status) => {
                write!(f, "opening the boot filesystem failed with code {status}")
            }
            Self::Open(status) => write!(f, "opening the payload failed with code {status}"),
            Self::NotAFile => f.write_str("payload path names a directory"),
            Self::Info(status) => {
                write!(f, "reading payload metadata failed with code {status}")
            }
            Self::Read(status) => write!(f, "reading the payload failed with code {status}"),
            Self::UnexpectedEndOfFile => f.write_str("payload ended before its recorded size"),
            Self::Load(status) => write!(f, "loading the payload failed with code {status}"),
            Self::Start(status) => write!(f, "starting the payload failed with code {status}"),
        }
    }
}

impl error::Error for LaunchError {}
