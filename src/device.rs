//! Core data model (Device, LUN, Transaction) and driver lifecycle (bind/unbind).

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use bitflags::bitflags;

use crate::err::{Error, Result, TransportError};
use crate::transport::{DataBuffer, HostOps, OpKind, UsbTransport};
use crate::worker;

bitflags! {
    /// Per-LUN attribute flags exposed to the host block layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LunFlags: u32 {
        /// The medium (or the LUN itself) is write-protected.
        const READ_ONLY = 1 << 0;
        /// The medium is removable.
        const REMOVABLE = 1 << 1;
    }
}

/// Snapshot of one logical unit's state, shared between the worker thread
/// and the public [`Device`] handle.
#[derive(Debug, Clone)]
pub struct LunInfo {
    /// Index of this LUN, 0..=max_lun.
    pub index: u8,
    /// One past the last valid LBA; 0 until the first successful geometry probe.
    pub total_blocks: u64,
    /// Block size in bytes; 0 until the first successful geometry probe.
    pub block_size: u32,
    /// READ_ONLY / REMOVABLE attribute flags.
    pub flags: LunFlags,
    /// True once a block device has been registered with the host for this LUN.
    pub registered: bool,
}

impl LunInfo {
    pub(crate) fn new(index: u8) -> Self {
        LunInfo { index, total_blocks: 0, block_size: 0, flags: LunFlags::empty(), registered: false }
    }
}

/// One host-issued block operation, queued for the worker thread.
pub struct Transaction {
    /// READ, WRITE, or FLUSH.
    pub op: OpKind,
    /// Target logical unit.
    pub lun: u8,
    /// Device-relative block offset. Ignored for FLUSH.
    pub block_offset: u64,
    /// Number of blocks. Ignored for FLUSH.
    pub block_count: u32,
    /// Data buffer the operation reads from or writes into. `None` for FLUSH.
    pub data: Option<Arc<dyn DataBuffer>>,
    /// Byte offset into `data` at which this transaction's bytes begin.
    pub data_offset: u64,
    /// Invoked exactly once with the outcome, after dispatch completes.
    pub completion: Box<dyn FnOnce(Result<()>) + Send>,
}

pub(crate) struct Shared {
    pub(crate) queue: VecDeque<Transaction>,
    pub(crate) dead: bool,
}

/// Everything the worker thread and the public handle share: the FIFO, the
/// teardown flag, and the completion signal that wakes the worker.
pub(crate) struct QueueHandle {
    pub(crate) state: Mutex<Shared>,
    pub(crate) signal: Condvar,
}

impl QueueHandle {
    fn new() -> Self {
        QueueHandle { state: Mutex::new(Shared { queue: VecDeque::new(), dead: false }), signal: Condvar::new() }
    }

    fn push(&self, txn: Transaction) {
        let mut guard = self.state.lock().unwrap();
        guard.queue.push_back(txn);
        self.signal.notify_one();
    }
}

/// A bound USB Mass Storage driver instance.
///
/// Owns the worker thread's lifecycle; the transport and host-ops
/// implementations themselves are moved into the worker thread at bind time,
/// matching the single-owner concurrency model (the worker thread alone
/// drives the USB endpoints).
pub struct Device {
    queue: Arc<QueueHandle>,
    lun_info: Arc<Mutex<Vec<LunInfo>>>,
    worker: Option<JoinHandle<()>>,
    max_lun: u8,
}

impl Device {
    /// Binds to a USB Mass Storage interface: discovers LUNs, starts the
    /// worker thread, and makes the root device visible.
    ///
    /// `transport` and `host` are moved into the worker thread; all USB and
    /// host-registration calls happen there, never on the calling thread.
    pub fn bind<T, H>(mut transport: T, mut host: H) -> Result<Self>
    where
        T: UsbTransport + 'static,
        H: HostOps + 'static,
    {
        let max_lun = match transport.get_max_lun() {
            Ok(v) => v,
            Err(TransportError::Stall) => {
                transport.clear_control_stall()?;
                0
            }
            Err(e) => return Err(e.into()),
        };

        let queue = Arc::new(QueueHandle::new());
        let lun_info: Arc<Mutex<Vec<LunInfo>>> =
            Arc::new(Mutex::new((0..=max_lun).map(LunInfo::new).collect()));

        let worker_queue = queue.clone();
        let worker_lun_info = lun_info.clone();
        let worker = std::thread::Builder::new()
            .name("usb-msc-worker".into())
            .spawn(move || {
                worker::run(&mut transport, &mut host, max_lun, worker_queue, worker_lun_info);
            })
            .map_err(|_| Error::NoMemory)?;

        Ok(Device { queue, lun_info, worker: Some(worker), max_lun })
    }

    /// Highest valid LUN index.
    pub fn max_lun(&self) -> u8 {
        self.max_lun
    }

    /// Returns a snapshot of every LUN's current state.
    pub fn luns(&self) -> Vec<LunInfo> {
        self.lun_info.lock().unwrap().clone()
    }

    /// Enqueues a block operation. The completion callback fires exactly
    /// once, either with the operation's result or, if the device is torn
    /// down first, with `Error::IoNotPresent`.
    pub fn enqueue(&self, txn: Transaction) {
        self.queue.push(txn);
    }

    /// Tears the driver down: signals the worker, joins it, and drains any
    /// transactions left in the queue with `IoNotPresent`. Per-LUN and root
    /// device unregistration happens inside the worker as it observes
    /// teardown, per the single-owner concurrency model.
    pub fn unbind(mut self) {
        {
            let mut guard = self.queue.state.lock().unwrap();
            guard.dead = true;
        }
        self.queue.signal.notify_one();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.take() {
            {
                let mut guard = self.queue.state.lock().unwrap();
                guard.dead = true;
            }
            self.queue.signal.notify_one();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::TransportResult;
    use crate::scsi;
    use crate::transport::DataBuffer as DataBufferTrait;
    use crate::wire;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    enum Phase {
        AwaitingCbw,
        AwaitingWriteData { lba: u64, blocks: u32, tag: u32 },
        AwaitingReadData { bytes: Vec<u8>, tag: u32 },
        AwaitingCsw { tag: u32 },
    }

    /// A single fixed-geometry LUN, always ready, that actually stores
    /// written blocks so read-back can be verified.
    struct FakeTransport {
        block_size: u32,
        total_blocks: u64,
        storage: Vec<u8>,
        cache_enabled: bool,
        phase: Phase,
        stall_max_lun: bool,
    }

    impl FakeTransport {
        fn new(total_blocks: u64, block_size: u32) -> Self {
            FakeTransport {
                block_size,
                total_blocks,
                storage: vec![0u8; (total_blocks * block_size as u64) as usize],
                cache_enabled: false,
                phase: Phase::AwaitingCbw,
                stall_max_lun: false,
            }
        }

        fn with_max_lun_stall(mut self) -> Self {
            self.stall_max_lun = true;
            self
        }
    }

    impl UsbTransport for FakeTransport {
        fn bulk_in_ep(&self) -> u8 { 0x81 }
        fn bulk_out_ep(&self) -> u8 { 0x02 }
        fn bulk_in_max_packet(&self) -> u16 { 512 }
        fn bulk_out_max_packet(&self) -> u16 { 512 }
        fn max_transfer_bytes(&self) -> usize { 65536 }

        fn get_max_lun(&mut self) -> TransportResult<u8> {
            if self.stall_max_lun { Err(TransportError::Stall) } else { Ok(0) }
        }
        fn bulk_only_reset(&mut self) -> TransportResult<()> { Ok(()) }
        fn clear_halt(&mut self, _ep: u8) -> TransportResult<()> { Ok(()) }
        fn clear_control_stall(&mut self) -> TransportResult<()> { Ok(()) }

        fn bulk_out(&mut self, buf: &[u8]) -> TransportResult<usize> {
            match std::mem::replace(&mut self.phase, Phase::AwaitingCbw) {
                Phase::AwaitingCbw => {
                    assert_eq!(buf.len(), wire::CBW_LEN);
                    assert_eq!(&buf[0..4], &wire::CBW_SIGNATURE.to_le_bytes());
                    let tag = u32::from_le_bytes(buf[4..8].try_into().unwrap());
                    let cdb = &buf[15..15 + buf[14] as usize];
                    self.phase = self.dispatch_cbw(tag, cdb);
                    Ok(buf.len())
                }
                Phase::AwaitingWriteData { lba, blocks, tag } => {
                    let start = lba as usize * self.block_size as usize;
                    self.storage[start..start + buf.len()].copy_from_slice(buf);
                    let _ = blocks;
                    self.phase = Phase::AwaitingCsw { tag };
                    Ok(buf.len())
                }
                other => {
                    self.phase = other;
                    panic!("unexpected bulk_out call in fake transport");
                }
            }
        }

        fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
            match std::mem::replace(&mut self.phase, Phase::AwaitingCbw) {
                Phase::AwaitingReadData { bytes, tag } => {
                    let n = bytes.len().min(buf.len());
                    buf[..n].copy_from_slice(&bytes[..n]);
                    self.phase = Phase::AwaitingCsw { tag };
                    Ok(n)
                }
                Phase::AwaitingCsw { tag } => {
                    let csw = [
                        wire::CSW_SIGNATURE.to_le_bytes(),
                        tag.to_le_bytes(),
                        0u32.to_le_bytes(),
                    ]
                    .concat();
                    buf[..csw.len()].copy_from_slice(&csw);
                    buf[12] = 0;
                    self.phase = Phase::AwaitingCbw;
                    Ok(wire::CSW_LEN)
                }
                other => {
                    self.phase = other;
                    panic!("unexpected bulk_in call in fake transport");
                }
            }
        }
    }

    impl FakeTransport {
        fn dispatch_cbw(&mut self, tag: u32, cdb: &[u8]) -> Phase {
            match cdb[0] {
                scsi::op::TEST_UNIT_READY => Phase::AwaitingCsw { tag },
                scsi::op::SYNCHRONIZE_CACHE_10 => Phase::AwaitingCsw { tag },
                scsi::op::INQUIRY => {
                    let mut bytes = vec![0u8; 36];
                    bytes[1] = 0; // not removable
                    Phase::AwaitingReadData { bytes, tag }
                }
                scsi::op::READ_CAPACITY_10 => {
                    let mut bytes = vec![0u8; 8];
                    bytes[0..4].copy_from_slice(&((self.total_blocks - 1) as u32).to_be_bytes());
                    bytes[4..8].copy_from_slice(&self.block_size.to_be_bytes());
                    Phase::AwaitingReadData { bytes, tag }
                }
                scsi::op::MODE_SENSE_6 => {
                    let page = cdb[2] & 0x3F;
                    let alloc_len = cdb[4] as usize;
                    let mut bytes = vec![0u8; alloc_len];
                    if page == 0x08 && self.cache_enabled && bytes.len() > 6 {
                        bytes[6] = 0x04;
                    }
                    Phase::AwaitingReadData { bytes, tag }
                }
                scsi::op::READ_10 => {
                    let lba = u32::from_be_bytes(cdb[2..6].try_into().unwrap()) as u64;
                    let blocks = u16::from_be_bytes(cdb[7..9].try_into().unwrap()) as u32;
                    let start = lba as usize * self.block_size as usize;
                    let len = blocks as usize * self.block_size as usize;
                    Phase::AwaitingReadData { bytes: self.storage[start..start + len].to_vec(), tag }
                }
                scsi::op::WRITE_10 => {
                    let lba = u32::from_be_bytes(cdb[2..6].try_into().unwrap()) as u64;
                    let blocks = u16::from_be_bytes(cdb[7..9].try_into().unwrap()) as u32;
                    Phase::AwaitingWriteData { lba, blocks, tag }
                }
                _ => Phase::AwaitingCsw { tag },
            }
        }
    }

    #[derive(Default)]
    struct FakeHost {
        root_visible: bool,
        registered: Vec<(u8, u32, u64, LunFlags)>,
        unregistered_luns: Vec<u32>,
        root_unregistered: bool,
    }

    impl HostOps for FakeHost {
        type LunHandle = u32;

        fn make_root_visible(&mut self) {
            self.root_visible = true;
        }

        fn register_lun(&mut self, lun: u8, block_size: u32, block_count: u64, flags: LunFlags) -> u32 {
            self.registered.push((lun, block_size, block_count, flags));
            lun as u32
        }

        fn unregister_lun(&mut self, handle: u32) {
            self.unregistered_luns.push(handle);
        }

        fn unregister_root(&mut self) {
            self.root_unregistered = true;
        }
    }

    struct FakeData {
        bytes: StdMutex<Vec<u8>>,
    }

    impl FakeData {
        fn new(len: usize) -> Self {
            FakeData { bytes: StdMutex::new(vec![0u8; len]) }
        }
    }

    impl DataBufferTrait for FakeData {
        fn read_at(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
            let guard = self.bytes.lock().unwrap();
            dst.copy_from_slice(&guard[offset as usize..offset as usize + dst.len()]);
            Ok(())
        }

        fn write_at(&self, offset: u64, src: &[u8]) -> Result<()> {
            let mut guard = self.bytes.lock().unwrap();
            guard[offset as usize..offset as usize + src.len()].copy_from_slice(src);
            Ok(())
        }
    }

    fn wait_until<F: Fn() -> bool>(f: F) {
        for _ in 0..100 {
            if f() {
                return;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("condition not met within timeout");
    }

    #[test]
    fn bind_falls_back_to_single_lun_on_get_max_lun_stall() {
        let transport = FakeTransport::new(64, 512).with_max_lun_stall();
        let device = Device::bind(transport, FakeHost::default()).expect("bind");

        assert_eq!(device.max_lun(), 0);
        wait_until(|| device.luns()[0].registered);

        device.unbind();
    }

    #[test]
    fn write_then_read_round_trips_and_lun_registers() {
        let transport = FakeTransport::new(64, 512);
        let device = Device::bind(transport, FakeHost::default()).expect("bind");

        wait_until(|| device.luns()[0].registered);
        let info = &device.luns()[0];
        assert_eq!(info.total_blocks, 64);
        assert_eq!(info.block_size, 512);
        assert!(!info.flags.contains(LunFlags::READ_ONLY));

        let pattern = Arc::new(FakeData::new(1024));
        {
            let mut guard = pattern.bytes.lock().unwrap();
            guard.fill(0xAB);
        }

        let (tx, rx) = std::sync::mpsc::channel();
        device.enqueue(Transaction {
            op: OpKind::Write,
            lun: 0,
            block_offset: 0,
            block_count: 2,
            data: Some(pattern.clone() as Arc<dyn DataBufferTrait>),
            data_offset: 0,
            completion: Box::new(move |r| tx.send(r).unwrap()),
        });
        rx.recv().unwrap().expect("write succeeds");

        let readback = Arc::new(FakeData::new(1024));
        let (tx2, rx2) = std::sync::mpsc::channel();
        device.enqueue(Transaction {
            op: OpKind::Read,
            lun: 0,
            block_offset: 0,
            block_count: 2,
            data: Some(readback.clone() as Arc<dyn DataBufferTrait>),
            data_offset: 0,
            completion: Box::new(move |r| tx2.send(r).unwrap()),
        });
        rx2.recv().unwrap().expect("read succeeds");

        assert_eq!(*readback.bytes.lock().unwrap(), *pattern.bytes.lock().unwrap());

        device.unbind();
    }

    #[test]
    fn out_of_range_read_is_rejected_without_wire_traffic() {
        let transport = FakeTransport::new(64, 512);
        let device = Device::bind(transport, FakeHost::default()).expect("bind");
        wait_until(|| device.luns()[0].registered);

        let buf = Arc::new(FakeData::new(512));
        let (tx, rx) = std::sync::mpsc::channel();
        device.enqueue(Transaction {
            op: OpKind::Read,
            lun: 0,
            block_offset: 64,
            block_count: 1,
            data: Some(buf as Arc<dyn DataBufferTrait>),
            data_offset: 0,
            completion: Box::new(move |r| tx.send(r).unwrap()),
        });
        assert!(matches!(rx.recv().unwrap(), Err(Error::OutOfRange)));

        device.unbind();
    }

    #[test]
    fn unbind_drains_queue_and_unregisters_devices() {
        let transport = FakeTransport::new(64, 512);
        let device = Device::bind(transport, FakeHost::default()).expect("bind");
        wait_until(|| device.luns()[0].registered);

        let results = Arc::new(StdMutex::new(Vec::new()));
        for _ in 0..3 {
            let results = results.clone();
            device.enqueue(Transaction {
                op: OpKind::Flush,
                lun: 0,
                block_offset: 0,
                block_count: 0,
                data: None,
                data_offset: 0,
                completion: Box::new(move |r| results.lock().unwrap().push(r)),
            });
        }
        device.unbind();
        assert_eq!(results.lock().unwrap().len(), 3);
    }
}
