//! Bulk-Only Transport and SCSI CDB wire encoding.
//!
//! Every multi-byte field is written and read through explicit
//! `to_le_bytes`/`to_be_bytes`/`from_be_bytes` calls rather than overlaid on a
//! packed struct, so the endianness of each field (BOT wrappers are
//! little-endian, SCSI CDBs are big-endian) is visible at the call site.

/// Size in bytes of an encoded Command Block Wrapper.
pub const CBW_LEN: usize = 31;
/// Size in bytes of an encoded Command Status Wrapper.
pub const CSW_LEN: usize = 13;

/// CBW signature, "USBC" read little-endian.
pub const CBW_SIGNATURE: u32 = 0x4342_5355;
/// CSW signature, "USBS" read little-endian.
pub const CSW_SIGNATURE: u32 = 0x5342_5355;

/// Data-phase direction for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host reads data from the device.
    In,
    /// Host writes data to the device.
    Out,
}

/// Command Status Wrapper, decoded from the 13-byte wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Csw {
    /// Echoes the CBW signature field.
    pub signature: u32,
    /// Must equal the tag of the CBW this CSW answers.
    pub tag: u32,
    /// Bytes of the requested data phase the device did not transfer.
    pub data_residue: u32,
    /// 0 = passed, 1 = failed, 2 = phase error.
    pub status: u8,
}

impl Csw {
    /// Command completed successfully: status byte 0.
    pub const STATUS_PASSED: u8 = 0;
    /// Command failed: status byte 1.
    pub const STATUS_FAILED: u8 = 1;
    /// Phase error: status byte 2, unrecoverable without reset.
    pub const STATUS_PHASE_ERROR: u8 = 2;

    /// Decodes a CSW from its 13-byte wire representation.
    pub fn decode(bytes: &[u8; CSW_LEN]) -> Self {
        Csw {
            signature: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            tag: u32::from_le_bytes(bytes[4..8].try_into().unwrap()),
            data_residue: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            status: bytes[12],
        }
    }
}

/// Encodes a Command Block Wrapper.
///
/// `cdb` must be 1..=16 bytes; shorter CDBs are zero-padded to 16 bytes on
/// the wire, matching what real BOT devices expect.
pub fn encode_cbw(tag: u32, data_transfer_length: u32, direction: Direction, lun: u8, cdb: &[u8]) -> [u8; CBW_LEN] {
    debug_assert!(!cdb.is_empty() && cdb.len() <= 16);
    let mut out = [0u8; CBW_LEN];
    out[0..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
    out[4..8].copy_from_slice(&tag.to_le_bytes());
    out[8..12].copy_from_slice(&data_transfer_length.to_le_bytes());
    out[12] = if direction == Direction::In { 0x80 } else { 0x00 };
    out[13] = lun & 0x0F;
    out[14] = cdb.len() as u8;
    out[15..15 + cdb.len()].copy_from_slice(cdb);
    out
}

/// Builds a 6-byte CDB: opcode plus five parameter bytes.
pub fn cdb6(opcode: u8, p1: u8, p2: u8, p3: u8, allocation_length: u8, control: u8) -> [u8; 6] {
    [opcode, p1, p2, p3, allocation_length, control]
}

/// Builds a READ(10) or WRITE(10) CDB. `lba` and `transfer_length` are
/// encoded big-endian as the SCSI standard requires.
pub fn cdb10_rw(opcode: u8, lba: u32, block_count: u16) -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0] = opcode;
    out[2..6].copy_from_slice(&lba.to_be_bytes());
    out[7..9].copy_from_slice(&block_count.to_be_bytes());
    out
}

/// Builds a READ(12) or WRITE(12) CDB with a 32-bit block count.
pub fn cdb12_rw(opcode: u8, lba: u32, block_count: u32) -> [u8; 12] {
    let mut out = [0u8; 12];
    out[0] = opcode;
    out[2..6].copy_from_slice(&lba.to_be_bytes());
    out[6..10].copy_from_slice(&block_count.to_be_bytes());
    out
}

/// Builds a READ(16) or WRITE(16) CDB with a 64-bit LBA.
pub fn cdb16_rw(opcode: u8, lba: u64, block_count: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = opcode;
    out[2..10].copy_from_slice(&lba.to_be_bytes());
    out[10..14].copy_from_slice(&block_count.to_be_bytes());
    out
}

/// Builds a READ CAPACITY(10) CDB (no parameters beyond the opcode).
pub fn cdb_read_capacity10() -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0] = super::scsi::op::READ_CAPACITY_10;
    out
}

/// Builds a READ CAPACITY(16) CDB: service action 0x10, 32-bit allocation length.
pub fn cdb_read_capacity16() -> [u8; 16] {
    let mut out = [0u8; 16];
    out[0] = super::scsi::op::READ_CAPACITY_16;
    out[1] = 0x10;
    out[10..14].copy_from_slice(&32u32.to_be_bytes());
    out
}

/// Builds a SYNCHRONIZE CACHE(10) CDB.
pub fn cdb_sync_cache10() -> [u8; 10] {
    let mut out = [0u8; 10];
    out[0] = super::scsi::op::SYNCHRONIZE_CACHE_10;
    out
}
