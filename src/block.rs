//! Block I/O engine: chunking, CDB-width selection, and cache flush.

use crate::bot::Transactor;
use crate::err::{Error, Result};
use crate::scsi::op;
use crate::transport::{DataBuffer, UsbTransport};
use crate::wire::{self, Direction};

const LBA32_LIMIT: u64 = 1u64 << 32;
const COUNT16_LIMIT: u32 = 1u32 << 16;

enum CdbWidth {
    Ten,
    Twelve,
    Sixteen,
}

fn choose_width(total_blocks: u64, chunk_blocks: u32) -> CdbWidth {
    if total_blocks > LBA32_LIMIT {
        CdbWidth::Sixteen
    } else if chunk_blocks <= COUNT16_LIMIT {
        CdbWidth::Ten
    } else {
        CdbWidth::Twelve
    }
}

fn build_cdb(width: &CdbWidth, read: bool, lba: u64, blocks: u32) -> Vec<u8> {
    match width {
        CdbWidth::Ten => {
            let opcode = if read { op::READ_10 } else { op::WRITE_10 };
            wire::cdb10_rw(opcode, lba as u32, blocks as u16).to_vec()
        }
        CdbWidth::Twelve => {
            let opcode = if read { op::READ_12 } else { op::WRITE_12 };
            wire::cdb12_rw(opcode, lba as u32, blocks).to_vec()
        }
        CdbWidth::Sixteen => {
            let opcode = if read { op::READ_16 } else { op::WRITE_16 };
            wire::cdb16_rw(opcode, lba, blocks).to_vec()
        }
    }
}

struct Params {
    total_blocks: u64,
    block_size: u32,
    max_transfer: usize,
}

fn check_bounds(total_blocks: u64, block_offset: u64, block_count: u32) -> Result<()> {
    let count = block_count as u64;
    if block_offset >= total_blocks || total_blocks - block_offset < count {
        return Err(Error::OutOfRange);
    }
    Ok(())
}

/// Reads `block_count` blocks starting at `block_offset` into `data` at `data_offset`.
#[allow(clippy::too_many_arguments)]
pub fn read(
    xactor: &mut Transactor,
    transport: &mut dyn UsbTransport,
    lun: u8,
    total_blocks: u64,
    block_size: u32,
    max_transfer: usize,
    block_offset: u64,
    block_count: u32,
    data: &dyn DataBuffer,
    data_offset: u64,
) -> Result<()> {
    check_bounds(total_blocks, block_offset, block_count)?;
    let params = Params { total_blocks, block_size, max_transfer };
    run_chunks(xactor, transport, lun, &params, block_offset, block_count, true, data, data_offset)
}

/// Writes `block_count` blocks starting at `block_offset` from `data` at `data_offset`.
#[allow(clippy::too_many_arguments)]
pub fn write(
    xactor: &mut Transactor,
    transport: &mut dyn UsbTransport,
    lun: u8,
    total_blocks: u64,
    block_size: u32,
    max_transfer: usize,
    block_offset: u64,
    block_count: u32,
    data: &dyn DataBuffer,
    data_offset: u64,
) -> Result<()> {
    check_bounds(total_blocks, block_offset, block_count)?;
    let params = Params { total_blocks, block_size, max_transfer };
    run_chunks(xactor, transport, lun, &params, block_offset, block_count, false, data, data_offset)
}

#[allow(clippy::too_many_arguments)]
fn run_chunks(
    xactor: &mut Transactor,
    transport: &mut dyn UsbTransport,
    lun: u8,
    params: &Params,
    mut block_offset: u64,
    mut remaining: u32,
    read_op: bool,
    data: &dyn DataBuffer,
    mut data_offset: u64,
) -> Result<()> {
    if params.block_size == 0 {
        return Err(Error::InvalidArgs);
    }
    let max_blocks = (params.max_transfer / params.block_size as usize).max(1) as u32;

    while remaining > 0 {
        let chunk_blocks = remaining.min(max_blocks);
        let chunk_bytes = chunk_blocks as usize * params.block_size as usize;
        let width = choose_width(params.total_blocks, chunk_blocks);
        let cdb = build_cdb(&width, read_op, block_offset, chunk_blocks);

        let mut buf = vec![0u8; chunk_bytes];
        if !read_op {
            data.read_at(data_offset, &mut buf)?;
        }

        let direction = if read_op { Direction::In } else { Direction::Out };
        let outcome = xactor.transact(transport, lun, &cdb, Some((direction, &mut buf)))?;

        if outcome.residue != 0 || outcome.transferred != chunk_bytes {
            return Err(Error::Io);
        }

        if read_op {
            data.write_at(data_offset, &buf)?;
        }

        block_offset += chunk_blocks as u64;
        data_offset += chunk_bytes as u64;
        remaining -= chunk_blocks;
    }

    Ok(())
}

/// Flushes the device's write cache via SYNCHRONIZE CACHE(10). A no-op when
/// the LUN has no write cache.
pub fn flush(xactor: &mut Transactor, transport: &mut dyn UsbTransport, lun: u8, cache_enabled: bool) -> Result<()> {
    if !cache_enabled {
        return Ok(());
    }
    crate::commands::synchronize_cache(xactor, transport, lun)
}
