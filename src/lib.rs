//! USB Mass Storage Class driver: Bulk-Only Transport over a SCSI
//! transparent command set.
//!
//! This crate mediates between a host block-device interface (read / write /
//! flush addressed by logical block number) and a USB device exposing two
//! bulk endpoints. The USB host controller stack and the host block layer
//! are both treated as external collaborators, modeled as the
//! [`transport::UsbTransport`] and [`transport::HostOps`] traits; a
//! consuming binary supplies real implementations, and tests supply
//! in-memory fakes.
//!
//! # Example
//!
//! ```ignore
//! let device = Device::bind(my_usb_transport, my_host_ops)?;
//! device.enqueue(Transaction {
//!     op: OpKind::Read,
//!     lun: 0,
//!     block_offset: 0,
//!     block_count: 1,
//!     data: Some(my_buffer),
//!     data_offset: 0,
//!     completion: Box::new(|result| { /* ... */ }),
//! });
//! ```
#![deny(missing_docs)]

mod block;
mod bot;
mod commands;
mod device;
mod err;
mod geometry;
mod scsi;
mod transport;
mod wire;
mod worker;

pub use crate::device::{Device, LunFlags, LunInfo, Transaction};
pub use crate::err::{Error, Result, TransportError, TransportResult};
pub use crate::scsi::{op as scsi_op, sense_key};
pub use crate::transport::{DataBuffer, HostOps, OpKind, UsbTransport};
pub use crate::wire::{CBW_LEN, CSW_LEN, Direction};
