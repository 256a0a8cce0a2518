//! Trait boundaries standing in for the real USB controller stack, the host
//! block layer, and DMA-mapped transaction buffers.
//!
//! The driver is written entirely against these traits. A consuming binary
//! supplies real implementations backed by its USB host controller and block
//! subsystem; tests supply in-memory fakes.

use crate::err::TransportResult;

/// The USB host controller stack, as the driver needs to see it: one
/// interface with a bulk-in and bulk-out endpoint, class-specific control
/// requests, and blocking bulk transfers.
///
/// All methods block until completion; there is no separate poll/wait step
/// at this boundary, unlike the teacher's raw transfer-queue/poll-event
/// split, because waiting is folded into the call itself here.
pub trait UsbTransport: Send {
    /// Address of the bulk-in endpoint.
    fn bulk_in_ep(&self) -> u8;
    /// Address of the bulk-out endpoint.
    fn bulk_out_ep(&self) -> u8;
    /// Maximum packet size of the bulk-in endpoint.
    fn bulk_in_max_packet(&self) -> u16;
    /// Maximum packet size of the bulk-out endpoint.
    fn bulk_out_max_packet(&self) -> u16;
    /// Largest single data-phase transfer the transport can move in one call.
    fn max_transfer_bytes(&self) -> usize;

    /// Issues the class-specific GET_MAX_LUN control request.
    ///
    /// A stall is reported as `Err(TransportError::Stall)`, which callers
    /// interpret as "single LUN device", not a hard failure.
    fn get_max_lun(&mut self) -> TransportResult<u8>;

    /// Issues the class-specific Bulk-Only Mass Storage Reset control request.
    fn bulk_only_reset(&mut self) -> TransportResult<()>;

    /// Clears the HALT feature on the given bulk endpoint.
    fn clear_halt(&mut self, endpoint: u8) -> TransportResult<()>;

    /// Clears a stall on the control endpoint (endpoint 0).
    fn clear_control_stall(&mut self) -> TransportResult<()>;

    /// Sends `buf` out the bulk-out endpoint, blocking until complete.
    /// Returns the number of bytes actually transferred.
    fn bulk_out(&mut self, buf: &[u8]) -> TransportResult<usize>;

    /// Reads up to `buf.len()` bytes from the bulk-in endpoint into `buf`,
    /// blocking until complete. Returns the number of bytes actually
    /// transferred.
    fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<usize>;
}

/// A handle to transaction data, addressed by an opaque identity plus a byte
/// offset, standing in for a VMO or other DMA-mapped buffer.
pub trait DataBuffer: Send + Sync {
    /// Copies `dst.len()` bytes starting at `offset` out of this buffer.
    fn read_at(&self, offset: u64, dst: &mut [u8]) -> crate::err::Result<()>;
    /// Copies `src` into this buffer starting at `offset`.
    fn write_at(&self, offset: u64, src: &[u8]) -> crate::err::Result<()>;
}

/// Kind of block operation a [`crate::device::Transaction`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read blocks into the data buffer.
    Read,
    /// Write blocks from the data buffer.
    Write,
    /// Flush the device's write cache, if any.
    Flush,
}

/// The host block layer / device manager, as the driver needs to see it:
/// registering and unregistering per-LUN block devices, and making the root
/// device visible once probing has started.
pub trait HostOps: Send {
    /// Opaque handle to a registered per-LUN block device.
    type LunHandle: Send;

    /// Makes the root (controller) device visible to the rest of the system.
    fn make_root_visible(&mut self);

    /// Registers a block device for one LUN with the given geometry and flags.
    fn register_lun(&mut self, lun: u8, block_size: u32, block_count: u64, flags: crate::device::LunFlags) -> Self::LunHandle;

    /// Unregisters a previously registered per-LUN block device.
    fn unregister_lun(&mut self, handle: Self::LunHandle);

    /// Unregisters the root device. Called once, during unbind.
    fn unregister_root(&mut self);
}
