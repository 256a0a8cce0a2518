//! The worker thread: drains the transaction queue and polls LUN readiness.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::block;
use crate::bot::Transactor;
use crate::commands;
use crate::device::{LunInfo, QueueHandle, Transaction};
use crate::err::{Error, Result};
use crate::geometry;
use crate::transport::{HostOps, OpKind, UsbTransport};

/// Entry point run on the dedicated worker thread. Owns `transport` and
/// `host` for the lifetime of the device; no other thread ever touches them.
pub(crate) fn run<T, H>(
    transport: &mut T,
    host: &mut H,
    max_lun: u8,
    queue: Arc<QueueHandle>,
    lun_info: Arc<Mutex<Vec<LunInfo>>>,
) where
    T: UsbTransport,
    H: HostOps,
{
    let mut xactor = Transactor::new();
    let mut added: Vec<Option<H::LunHandle>> = (0..=max_lun).map(|_| None).collect();
    let mut cache_enabled: Vec<bool> = vec![false; max_lun as usize + 1];

    for lun in 0..=max_lun {
        match geometry::inquiry_scan(&mut xactor, transport, lun) {
            Ok(flags) => {
                let mut guard = lun_info.lock().unwrap();
                guard[lun as usize].flags = flags;
            }
            Err(e) => {
                log::warn!("worker: inquiry scan failed for lun {lun}: {e}");
            }
        }
    }

    host.make_root_visible();

    loop {
        let mut guard = queue.state.lock().unwrap();
        if guard.dead {
            drop(guard);
            break;
        }
        if let Some(txn) = guard.queue.pop_front() {
            drop(guard);
            dispatch(&mut xactor, transport, &lun_info, &cache_enabled, txn);
            continue;
        }

        let (guard, timeout) = queue.signal.wait_timeout(guard, Duration::from_secs(1)).unwrap();
        let dead = guard.dead;
        let empty = guard.queue.is_empty();
        drop(guard);
        if dead {
            break;
        }
        if timeout.timed_out() && empty {
            if sweep(&mut xactor, transport, host, max_lun, &lun_info, &mut added, &mut cache_enabled).is_err() {
                log::error!("worker: readiness sweep failed, exiting worker");
                break;
            }
        }
    }

    let remaining: Vec<Transaction> = {
        let mut guard = queue.state.lock().unwrap();
        guard.queue.drain(..).collect()
    };
    for txn in remaining {
        (txn.completion)(Err(Error::IoNotPresent));
    }

    for handle in added.into_iter().flatten() {
        host.unregister_lun(handle);
    }
    host.unregister_root();
}

fn dispatch<T: UsbTransport>(
    xactor: &mut Transactor,
    transport: &mut T,
    lun_info: &Arc<Mutex<Vec<LunInfo>>>,
    cache_enabled: &[bool],
    txn: Transaction,
) {
    let lun = txn.lun;
    let result = run_op(xactor, transport, lun_info, cache_enabled, &txn);
    (txn.completion)(result);
    if let Err(e) = result {
        log::debug!("worker: transaction on lun {lun} failed: {e}");
    }
}

fn run_op<T: UsbTransport>(
    xactor: &mut Transactor,
    transport: &mut T,
    lun_info: &Arc<Mutex<Vec<LunInfo>>>,
    cache_enabled: &[bool],
    txn: &Transaction,
) -> Result<()> {
    let lun = txn.lun;
    let info = lun_info.lock().unwrap()[lun as usize].clone();
    let max_transfer = transport.max_transfer_bytes();

    match txn.op {
        OpKind::Read => {
            let data = txn.data.as_ref().ok_or(Error::InvalidArgs)?;
            block::read(
                xactor,
                transport,
                lun,
                info.total_blocks,
                info.block_size,
                max_transfer,
                txn.block_offset,
                txn.block_count,
                data.as_ref(),
                txn.data_offset,
            )
        }
        OpKind::Write => {
            let data = txn.data.as_ref().ok_or(Error::InvalidArgs)?;
            block::write(
                xactor,
                transport,
                lun,
                info.total_blocks,
                info.block_size,
                max_transfer,
                txn.block_offset,
                txn.block_count,
                data.as_ref(),
                txn.data_offset,
            )
        }
        OpKind::Flush => block::flush(xactor, transport, lun, cache_enabled[lun as usize]),
    }
}

/// Polls every LUN with TEST UNIT READY; on a ready transition that hasn't
/// been registered yet, runs the full geometry probe and registers a block
/// device; on a not-ready transition, unregisters it.
#[allow(clippy::too_many_arguments)]
fn sweep<T, H>(
    xactor: &mut Transactor,
    transport: &mut T,
    host: &mut H,
    max_lun: u8,
    lun_info: &Arc<Mutex<Vec<LunInfo>>>,
    added: &mut [Option<H::LunHandle>],
    cache_enabled: &mut [bool],
) -> Result<()>
where
    T: UsbTransport,
    H: HostOps,
{
    for lun in 0..=max_lun {
        let ready = match commands::test_unit_ready(xactor, transport, lun) {
            Ok(ready) => ready,
            Err(Error::BadState) => {
                if let Ok(sense) = commands::request_sense(xactor, transport, lun) {
                    log::debug!(
                        "worker: lun {lun} not ready, sense key 0x{:02x} asc 0x{:02x} ascq 0x{:02x}",
                        sense.sense_key(),
                        sense.asc,
                        sense.ascq
                    );
                }
                false
            }
            Err(e) => return Err(e),
        };

        let idx = lun as usize;
        let was_registered = added[idx].is_some();

        if ready && !was_registered {
            let known_flags = lun_info.lock().unwrap()[idx].flags;
            match geometry::probe_geometry(xactor, transport, lun, known_flags) {
                Ok(geo) => {
                    cache_enabled[idx] = geometry::probe_cache_enabled(xactor, transport, lun);
                    let handle = host.register_lun(lun, geo.block_size, geo.total_blocks, geo.flags);
                    added[idx] = Some(handle);
                    let mut guard = lun_info.lock().unwrap();
                    guard[idx].total_blocks = geo.total_blocks;
                    guard[idx].block_size = geo.block_size;
                    guard[idx].flags = geo.flags;
                    guard[idx].registered = true;
                }
                Err(e) => {
                    log::warn!("worker: geometry probe failed for lun {lun}: {e}");
                }
            }
        } else if !ready && was_registered {
            if let Some(handle) = added[idx].take() {
                host.unregister_lun(handle);
            }
            let mut guard = lun_info.lock().unwrap();
            guard[idx].registered = false;
        }
    }
    Ok(())
}
