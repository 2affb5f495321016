//! Enumeration of the volumes that may carry config partitions.

use alloc::vec::Vec;
use core::{error, fmt};

use log::warn;
use uefi::{
    boot,
    proto::{
        device_path::{DevicePath, DevicePathNode, DeviceSubType, DeviceType},
        loaded_image::LoadedImage,
        media::fs::SimpleFileSystem,
    },
    Handle, Status,
};

/// One filesystem volume visible to the firmware.
///
/// The boot-volume and boot-disk relations are resolved against the device
/// the firmware loaded this image from, once, while the volume table is
/// built; they are stable for the rest of the boot.
pub struct Volume {
    /// The handle carrying the volume's file protocol.
    pub handle: Handle,
    /// Whether this is the volume the firmware itself booted from.
    pub on_boot_volume: bool,
    /// Whether the volume resides on the same disk as the boot volume.
    pub on_boot_disk: bool,
}

/// Builds the table of candidate volumes.
pub fn enumerate_volumes() -> Result<Vec<Volume>, EnumerateVolumesError> {
    let handles = boot::find_handles::<SimpleFileSystem>()
        .map_err(|error| EnumerateVolumesError::FindHandles(error.status()))?;

    let loaded_image = boot::open_protocol_exclusive::<LoadedImage>(boot::image_handle())
        .map_err(|error| EnumerateVolumesError::LoadedImage(error.status()))?;
    let boot_device = loaded_image
        .device()
        .ok_or(EnumerateVolumesError::NoBootDevice)?;

    let boot_devpath = boot::open_protocol_exclusive::<DevicePath>(boot_device)
        .map_err(|error| EnumerateVolumesError::NoBootDevicePath(error.status()))?
        .to_boxed();

    let mut volumes = Vec::with_capacity(handles.len());
    for handle in handles {
        volumes.push(describe_volume(handle, boot_device, &boot_devpath));
    }

    Ok(volumes)
}

fn describe_volume(handle: Handle, boot_device: Handle, boot_devpath: &DevicePath) -> Volume {
    let on_boot_volume = handle.as_ptr() == boot_device.as_ptr();

    let on_boot_disk = match boot::open_protocol_exclusive::<DevicePath>(handle) {
        Ok(devpath) => on_boot_volume || same_disk(&devpath, boot_devpath),
        Err(error) => {
            warn!(
                "Volume without a device path is treated as off-disk: {}",
                error.status()
            );
            false
        }
    };

    Volume {
        handle,
        on_boot_volume,
        on_boot_disk,
    }
}

/// Whether two partition device paths reside on the same disk: every node up
/// to the trailing hard-drive media node must match.
fn same_disk(lhs: &DevicePath, rhs: &DevicePath) -> bool {
    let mut lhs_nodes = lhs.node_iter();
    let mut rhs_nodes = rhs.node_iter();

    loop {
        match (lhs_nodes.next(), rhs_nodes.next()) {
            (None, None) => return true,
            (Some(lhs_node), Some(rhs_node)) => {
                if is_partition_node(lhs_node) && is_partition_node(rhs_node) {
                    return true;
                }

                if lhs_node.full_type() != rhs_node.full_type()
                    || lhs_node.data() != rhs_node.data()
                {
                    return false;
                }
            }
            _ => return false,
        }
    }
}

fn is_partition_node(node: &DevicePathNode) -> bool {
    node.full_type() == (DeviceType::MEDIA, DeviceSubType::MEDIA_HARD_DRIVE)
}

/// Various errors that can occur while building the volume table.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum EnumerateVolumesError {
    /// Locating the filesystem handles failed.
    FindHandles(Status),
    /// The loaded-image protocol of this image could not be opened.
    LoadedImage(Status),
    /// The firmware did not record which device this image was loaded from.
    NoBootDevice,
    /// The boot device carries no device path.
    NoBootDevicePath(Status),
}

impl fmt::Display for EnumerateVolumesError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FindHandles(status) => {
                write!(f, "locating filesystem volumes failed with code {status}")
            }
            Self::LoadedImage(status) => write!(
                f,
                "opening the loaded image protocol failed with code {status}"
            ),
            Self::NoBootDevice => f.write_str("the boot device of this image is unknown"),
            Self::NoBootDevicePath(status) => write!(
                f,
                "opening the boot device path failed with code {status}"
            ),
        }
    }
}

impl error::Error for EnumerateVolumesError {}
