//! LUN discovery: the one-time startup INQUIRY scan and the fuller capacity /
//! mode-sense probe run once a LUN is first observed ready.

use crate::bot::Transactor;
use crate::commands;
use crate::device::LunFlags;
use crate::err::{Error, Result};
use crate::transport::UsbTransport;

/// Runs INQUIRY for one LUN and returns its REMOVABLE flag.
///
/// Run once per LUN at worker startup, before the root device is made
/// visible, so a removable LUN with no media present yet is still known to
/// be removable the first time the readiness sweep probes it.
pub fn inquiry_scan(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<LunFlags> {
    let data = commands::inquiry(xactor, transport, lun)?;
    let mut flags = LunFlags::empty();
    if data.is_removable() {
        flags |= LunFlags::REMOVABLE;
    }
    Ok(flags)
}

/// Result of a full geometry probe: capacity and attribute flags.
pub struct Geometry {
    /// One past the last valid LBA.
    pub total_blocks: u64,
    /// Block size in bytes.
    pub block_size: u32,
    /// READ_ONLY / REMOVABLE flags, merged with whatever the caller already knew.
    pub flags: LunFlags,
}

/// Runs READ CAPACITY (falling back to the 16-byte form) and MODE SENSE for
/// the write-protect and write-cache bits. Called the first time a LUN is
/// observed ready by the readiness sweep.
pub fn probe_geometry(
    xactor: &mut Transactor,
    transport: &mut dyn UsbTransport,
    lun: u8,
    known_flags: LunFlags,
) -> Result<Geometry> {
    let cap = commands::read_capacity(xactor, transport, lun)?;
    if cap.block_size == 0 {
        return Err(Error::InvalidArgs);
    }
    let total_blocks = cap.last_lba + 1;

    let mut flags = known_flags;
    let write_protected = commands::mode_sense_write_protected(xactor, transport, lun)?;
    flags.set(LunFlags::READ_ONLY, write_protected);

    Ok(Geometry { total_blocks, block_size: cap.block_size, flags })
}

/// Whether the write cache is enabled, per the page-0x08 mode sense. Kept
/// separate from [`probe_geometry`] since it feeds `flush` policy rather
/// than LUN attribute flags exposed to the host.
pub fn probe_cache_enabled(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> bool {
    commands::mode_sense_cache_enabled(xactor, transport, lun)
}
