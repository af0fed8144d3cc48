//! Locating dives inside a raw memory dump by their start and end markers.

use log::{debug, warn};

use crate::array;
use crate::error::{DeviceError, Result};

/// Marker convention of a family that stores dives back to back, each one
/// opened by a fixed header and closed by a fixed footer.
#[derive(Debug, Clone, Copy)]
pub struct MarkerLayout {
    pub header: &'static [u8],
    pub footer: &'static [u8],
    /// Offset of the little-endian u32 timestamp from the header start.
    pub timestamp_offset: usize,
    /// Bytes after the header start that never contain the footer.
    pub skip: usize,
}

/// Reports dives newest first, i.e. from the end of `data` towards its start.
///
/// Stops quietly at the first dive whose timestamp is not newer than `cutoff`,
/// or when `callback` returns `false`. The callback receives the dive bytes
/// and the 4 timestamp bytes that identify it.
pub fn extract_dives<F>(
    data: &[u8],
    layout: &MarkerLayout,
    cutoff: Option<u32>,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(&[u8], &[u8]) -> bool,
{
    let hsize = layout.header.len();
    let fsize = layout.footer.len();

    let mut previous = data.len();
    let mut current = data.len().saturating_sub(hsize);
    while current > 0 {
        current -= 1;
        if data[current..current + hsize] != *layout.header {
            continue;
        }

        // The end marker must come before the start of the dive reported last.
        let mut offset = current + layout.skip;
        let end = loop {
            if offset + fsize > previous {
                warn!("No end marker for dive at offset {}.", current);
                return Err(DeviceError::DataFormat(format!(
                    "dive at offset {} has no end marker",
                    current
                )));
            }
            if data[offset..offset + fsize] == *layout.footer {
                break offset + fsize;
            }
            offset += 1;
        };

        let fingerprint = &data[current + layout.timestamp_offset..][..4];
        let timestamp = array::uint32_le(fingerprint);
        if matches!(cutoff, Some(cutoff) if timestamp <= cutoff) {
            debug!("dive {} already downloaded, stopping", timestamp);
            return Ok(());
        }

        debug!("dive at {}..{} timestamp {}", current, end, timestamp);
        if !callback(&data[current..end], fingerprint) {
            return Ok(());
        }

        previous = current;
        current = current.saturating_sub(hsize);
    }

    Ok(())
}
