//! Typed SCSI command wrappers built on the BOT transactor.

use crate::bot::Transactor;
use crate::err::{Error, Result};
use crate::scsi::{self, InquiryData, ReadCapacityData, RequestSenseData};
use crate::transport::UsbTransport;
use crate::wire::{self, Direction};

/// Issues INQUIRY and returns the parsed standard response.
pub fn inquiry(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<InquiryData> {
    let cdb = wire::cdb6(scsi::op::INQUIRY, 0, 0, 0, 36, 0);
    let mut buf = [0u8; 36];
    xactor.transact(transport, lun, &cdb, Some((Direction::In, &mut buf)))?;
    Ok(InquiryData::parse(&buf))
}

/// Issues TEST UNIT READY. Returns `Ok(true)` if ready. A CSW-failed status
/// is surfaced as `Err(Error::BadState)` rather than folded into `Ok(false)`,
/// so callers can tell "not ready" apart from other failures and follow up
/// with REQUEST SENSE to clear the unit attention / sense condition.
pub fn test_unit_ready(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<bool> {
    let cdb = wire::cdb6(scsi::op::TEST_UNIT_READY, 0, 0, 0, 0, 0);
    xactor.transact(transport, lun, &cdb, None).map(|_| true)
}

/// Issues REQUEST SENSE and returns the parsed fixed-format response.
pub fn request_sense(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<RequestSenseData> {
    let cdb = wire::cdb6(scsi::op::REQUEST_SENSE, 0, 0, 0, 18, 0);
    let mut buf = [0u8; 18];
    xactor.transact(transport, lun, &cdb, Some((Direction::In, &mut buf)))?;
    Ok(RequestSenseData::parse(&buf))
}

/// Issues READ CAPACITY(10), falling back to READ CAPACITY(16) when the
/// 10-byte form returns the 32-bit sentinel.
pub fn read_capacity(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<ReadCapacityData> {
    let cdb = wire::cdb_read_capacity10();
    let mut buf = [0u8; 8];
    xactor.transact(transport, lun, &cdb, Some((Direction::In, &mut buf)))?;
    let cap10 = ReadCapacityData::parse10(&buf);
    if cap10.last_lba == ReadCapacityData::SENTINEL_LBA32 as u64 {
        let cdb16 = wire::cdb_read_capacity16();
        let mut buf16 = [0u8; 32];
        xactor.transact(transport, lun, &cdb16, Some((Direction::In, &mut buf16)))?;
        Ok(ReadCapacityData::parse16(&buf16))
    } else {
        Ok(cap10)
    }
}

/// Issues MODE SENSE(6) for page 0x3F (all pages) and returns whether the
/// write-protect bit is set.
pub fn mode_sense_write_protected(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<bool> {
    let cdb = scsi::cdb_mode_sense6(0x3F, 255);
    let mut buf = [0u8; 255];
    xactor.transact(transport, lun, &cdb, Some((Direction::In, &mut buf)))?;
    Ok(scsi::mode_sense6_write_protected(&buf))
}

/// Issues MODE SENSE(6) for page 0x08 (caching) and returns whether the
/// write cache is enabled. On command failure, conservatively reports the
/// cache enabled so the caller keeps issuing flushes.
pub fn mode_sense_cache_enabled(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> bool {
    let cdb = scsi::cdb_mode_sense6(0x08, 20);
    let mut buf = [0u8; 20];
    match xactor.transact(transport, lun, &cdb, Some((Direction::In, &mut buf))) {
        Ok(_) => scsi::mode_sense6_cache_enabled(&buf),
        Err(_) => true,
    }
}

/// Issues SYNCHRONIZE CACHE(10) with a zero-length data phase. A passed
/// status with nonzero residue is still a failure: there was no data phase
/// to leave a residue in, so any residue means the device didn't actually
/// flush.
pub fn synchronize_cache(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8) -> Result<()> {
    let cdb = wire::cdb_sync_cache10();
    let outcome = xactor.transact(transport, lun, &cdb, None)?;
    if outcome.residue != 0 {
        return Err(Error::Io);
    }
    Ok(())
}
