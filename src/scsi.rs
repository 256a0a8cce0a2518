//! SCSI transparent command set: opcodes and parsed response data.

/// SCSI operation codes used by this driver.
pub mod op {
    /// Test Unit Ready
    pub const TEST_UNIT_READY: u8 = 0x00;
    /// Request Sense
    pub const REQUEST_SENSE: u8 = 0x03;
    /// Inquiry
    pub const INQUIRY: u8 = 0x12;
    /// Mode Sense (6)
    pub const MODE_SENSE_6: u8 = 0x1A;
    /// Read Capacity (10)
    pub const READ_CAPACITY_10: u8 = 0x25;
    /// Read (10)
    pub const READ_10: u8 = 0x28;
    /// Write (10)
    pub const WRITE_10: u8 = 0x2A;
    /// Synchronize Cache (10)
    pub const SYNCHRONIZE_CACHE_10: u8 = 0x35;
    /// Read (12)
    pub const READ_12: u8 = 0xA8;
    /// Write (12)
    pub const WRITE_12: u8 = 0xAA;
    /// Read Capacity (16) / service action in
    pub const READ_CAPACITY_16: u8 = 0x9E;
    /// Read (16)
    pub const READ_16: u8 = 0x88;
    /// Write (16)
    pub const WRITE_16: u8 = 0x8A;
}

/// SCSI sense keys, as returned by REQUEST SENSE.
pub mod sense_key {
    /// No sense
    pub const NO_SENSE: u8 = 0x00;
    /// Not ready
    pub const NOT_READY: u8 = 0x02;
    /// Medium error
    pub const MEDIUM_ERROR: u8 = 0x03;
    /// Illegal request
    pub const ILLEGAL_REQUEST: u8 = 0x05;
    /// Unit attention
    pub const UNIT_ATTENTION: u8 = 0x06;
}

/// Parsed INQUIRY standard response (36 bytes minimum).
#[derive(Debug, Clone, Copy, Default)]
pub struct InquiryData {
    /// Peripheral qualifier and device type, byte 0.
    pub peripheral: u8,
    /// Byte 1; bit 7 is the removable-media bit (RMB).
    pub rmb_byte: u8,
}

impl InquiryData {
    /// Parses a 36-byte INQUIRY response.
    pub fn parse(bytes: &[u8]) -> Self {
        InquiryData {
            peripheral: bytes[0],
            rmb_byte: bytes[1],
        }
    }

    /// Peripheral device type (low 5 bits of byte 0); 0 is direct-access block device.
    pub fn device_type(&self) -> u8 {
        self.peripheral & 0x1F
    }

    /// True if the medium is removable.
    pub fn is_removable(&self) -> bool {
        self.rmb_byte & 0x80 != 0
    }
}

/// Parsed REQUEST SENSE fixed-format response (18 bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSenseData {
    /// Byte 2, low nibble is the sense key.
    pub sense_key_byte: u8,
    /// Additional sense code, byte 12.
    pub asc: u8,
    /// Additional sense code qualifier, byte 13.
    pub ascq: u8,
}

impl RequestSenseData {
    /// Parses an 18-byte REQUEST SENSE response.
    pub fn parse(bytes: &[u8]) -> Self {
        RequestSenseData {
            sense_key_byte: bytes[2],
            asc: bytes[12],
            ascq: bytes[13],
        }
    }

    /// The sense key (low 4 bits of byte 2).
    pub fn sense_key(&self) -> u8 {
        self.sense_key_byte & 0x0F
    }
}

/// Parsed READ CAPACITY response, either the 10- or 16-byte variant.
#[derive(Debug, Clone, Copy)]
pub struct ReadCapacityData {
    /// Last addressable LBA (not block count).
    pub last_lba: u64,
    /// Block size in bytes.
    pub block_size: u32,
}

impl ReadCapacityData {
    /// Parses an 8-byte READ CAPACITY(10) response.
    pub fn parse10(bytes: &[u8]) -> Self {
        ReadCapacityData {
            last_lba: u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as u64,
            block_size: u32::from_be_bytes(bytes[4..8].try_into().unwrap()),
        }
    }

    /// Parses a 32-byte READ CAPACITY(16) response.
    pub fn parse16(bytes: &[u8]) -> Self {
        ReadCapacityData {
            last_lba: u64::from_be_bytes(bytes[0..8].try_into().unwrap()),
            block_size: u32::from_be_bytes(bytes[8..12].try_into().unwrap()),
        }
    }

    /// Sentinel value returned by READ CAPACITY(10) when the medium exceeds 32-bit LBAs.
    pub const SENTINEL_LBA32: u32 = 0xFFFF_FFFF;
}

/// Builds a MODE SENSE(6) CDB for the given page code.
pub fn cdb_mode_sense6(page_code: u8, allocation_length: u8) -> [u8; 6] {
    crate::wire::cdb6(op::MODE_SENSE_6, 0, page_code & 0x3F, 0, allocation_length, 0)
}

/// Mode parameter header (6-byte form) plus page 0x3F device-specific byte.
///
/// Byte 2 of the mode parameter header is the device-specific parameter;
/// bit 7 is the write-protect (WP) bit.
pub fn mode_sense6_write_protected(bytes: &[u8]) -> bool {
    bytes.len() > 2 && bytes[2] & 0x80 != 0
}

/// Byte 6 bit 2 of the page-0x08 (caching) mode page is the Write Cache
/// Enable (WCE) bit; the page follows a 4-byte mode parameter header, so
/// this bit lands at offset 4 + 2 = 6 in the full response buffer.
pub fn mode_sense6_cache_enabled(bytes: &[u8]) -> bool {
    bytes.len() > 6 && bytes[6] & 0x04 != 0
}
