//! Bulk-Only Transport transactor: one CBW / data-phase / CSW round trip.

use crate::err::{Error, Result};
use crate::transport::UsbTransport;
use crate::wire::{self, CSW_LEN, Csw, Direction};

/// Outcome of a completed BOT transaction: bytes actually moved in the data
/// phase and the residue the device reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct Outcome {
    /// Bytes actually transferred during the data phase.
    pub transferred: usize,
    /// Residue reported in the CSW: bytes of the requested data phase the
    /// device did not transfer.
    pub residue: u32,
}

/// Drives the CBW / data-phase / CSW sequence over a [`UsbTransport`],
/// tracking the send and expected-receive tag counters.
pub struct Transactor {
    send_tag: u32,
    recv_tag: u32,
}

impl Transactor {
    /// Starting tag value. Any shared nonzero start is admissible; 8 matches
    /// the value this driver was grounded on.
    const INITIAL_TAG: u32 = 8;

    /// Creates a transactor with send and receive tags equal, as required.
    pub fn new() -> Self {
        Transactor { send_tag: Self::INITIAL_TAG, recv_tag: Self::INITIAL_TAG }
    }

    /// Executes one SCSI command: CBW, optional data phase, CSW.
    ///
    /// `data` is `Some((direction, buf))` when the command carries a data
    /// phase; `buf`'s length is the data transfer length. On success,
    /// `buf` holds whatever the device sent back (for `In`) or has already
    /// been sent from (for `Out`).
    pub fn transact(
        &mut self,
        transport: &mut dyn UsbTransport,
        lun: u8,
        cdb: &[u8],
        data: Option<(Direction, &mut [u8])>,
    ) -> Result<Outcome> {
        let tag = self.send_tag;
        self.send_tag = self.send_tag.wrapping_add(1);

        let data_len = data.as_ref().map(|(_, b)| b.len()).unwrap_or(0);
        let direction = data.as_ref().map(|(d, _)| *d).unwrap_or(Direction::Out);

        let cbw = wire::encode_cbw(tag, data_len as u32, direction, lun, cdb);
        transport.bulk_out(&cbw).map_err(|_| {
            log::error!("bot: failed to send CBW tag={tag}");
            Error::Io
        })?;

        let mut transferred = 0usize;
        if let Some((dir, buf)) = data {
            transferred = match dir {
                Direction::In => transport.bulk_in(buf).map_err(|_| Error::Io)?,
                Direction::Out => transport.bulk_out(buf).map_err(|_| Error::Io)?,
            };
        }

        let mut csw_bytes = [0u8; CSW_LEN];
        transport.bulk_in(&mut csw_bytes).map_err(|_| Error::Io)?;
        let csw = Csw::decode(&csw_bytes);

        let expected_tag = tag;
        self.recv_tag = self.recv_tag.wrapping_add(1);

        if csw.signature != wire::CSW_SIGNATURE {
            log::error!("bot: bad CSW signature 0x{:08x}, resetting", csw.signature);
            self.recover(transport)?;
            return Err(Error::Internal);
        }
        if csw.tag != expected_tag {
            log::error!("bot: CSW tag mismatch, expected {expected_tag} got {}", csw.tag);
            self.recover(transport)?;
            return Err(Error::Internal);
        }
        match csw.status {
            Csw::STATUS_PASSED => Ok(Outcome { transferred, residue: csw.data_residue }),
            Csw::STATUS_FAILED => Err(Error::BadState),
            Csw::STATUS_PHASE_ERROR => {
                log::error!("bot: CSW reported phase error, resetting");
                self.recover(transport)?;
                Err(Error::Internal)
            }
            other => {
                log::error!("bot: CSW reported unknown status {other}, resetting");
                self.recover(transport)?;
                Err(Error::Internal)
            }
        }
    }

    /// Performs reset recovery: class reset, then clear HALT on both bulk endpoints.
    pub fn recover(&mut self, transport: &mut dyn UsbTransport) -> Result<()> {
        log::warn!("bot: performing reset recovery");
        transport.bulk_only_reset().map_err(|_| Error::Io)?;
        transport.clear_halt(transport.bulk_in_ep()).map_err(|_| Error::Io)?;
        transport.clear_halt(transport.bulk_out_ep()).map_err(|_| Error::Io)?;
        Ok(())
    }
}

impl Default for Transactor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::TransportResult;

    struct FakeTransport {
        out_log: Vec<Vec<u8>>,
        in_script: std::collections::VecDeque<Vec<u8>>,
        reset_calls: u32,
        halt_clears: Vec<u8>,
        fail_bulk: bool,
    }

    impl FakeTransport {
        fn new() -> Self {
            FakeTransport {
                out_log: Vec::new(),
                in_script: std::collections::VecDeque::new(),
                reset_calls: 0,
                halt_clears: Vec::new(),
                fail_bulk: false,
            }
        }

        fn push_in(&mut self, bytes: Vec<u8>) {
            self.in_script.push_back(bytes);
        }
    }

    impl UsbTransport for FakeTransport {
        fn bulk_in_ep(&self) -> u8 { 0x81 }
        fn bulk_out_ep(&self) -> u8 { 0x02 }
        fn bulk_in_max_packet(&self) -> u16 { 512 }
        fn bulk_out_max_packet(&self) -> u16 { 512 }
        fn max_transfer_bytes(&self) -> usize { 65536 }

        fn get_max_lun(&mut self) -> TransportResult<u8> { Ok(0) }
        fn bulk_only_reset(&mut self) -> TransportResult<()> { self.reset_calls += 1; Ok(()) }
        fn clear_halt(&mut self, ep: u8) -> TransportResult<()> { self.halt_clears.push(ep); Ok(()) }
        fn clear_control_stall(&mut self) -> TransportResult<()> { Ok(()) }

        fn bulk_out(&mut self, buf: &[u8]) -> TransportResult<usize> {
            if self.fail_bulk {
                return Err(crate::err::TransportError::Failed(1));
            }
            self.out_log.push(buf.to_vec());
            Ok(buf.len())
        }

        fn bulk_in(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
            if self.fail_bulk {
                return Err(crate::err::TransportError::Failed(1));
            }
            let next = self.in_script.pop_front().unwrap_or_default();
            let n = next.len().min(buf.len());
            buf[..n].copy_from_slice(&next[..n]);
            Ok(n)
        }
    }

    fn ok_csw(tag: u32, residue: u32, status: u8) -> Vec<u8> {
        let mut b = vec![0u8; CSW_LEN];
        b[0..4].copy_from_slice(&wire::CSW_SIGNATURE.to_le_bytes());
        b[4..8].copy_from_slice(&tag.to_le_bytes());
        b[8..12].copy_from_slice(&residue.to_le_bytes());
        b[12] = status;
        b
    }

    #[test]
    fn successful_transaction_echoes_tag_and_advances() {
        let mut t = FakeTransport::new();
        t.push_in(ok_csw(Transactor::INITIAL_TAG, 0, Csw::STATUS_PASSED));
        let mut xactor = Transactor::new();
        let outcome = xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap();
        assert_eq!(outcome.residue, 0);
        assert_eq!(t.out_log.len(), 1);
        assert_eq!(&t.out_log[0][0..4], &wire::CBW_SIGNATURE.to_le_bytes());
    }

    fn init_logging() {
        let _ = env_logger::try_init();
    }

    #[test]
    fn bad_signature_triggers_reset_recovery() {
        init_logging();
        let mut t = FakeTransport::new();
        let mut bad = ok_csw(Transactor::INITIAL_TAG, 0, Csw::STATUS_PASSED);
        bad[0] = 0;
        t.push_in(bad);
        let mut xactor = Transactor::new();
        let err = xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap_err();
        assert!(matches!(err, Error::Internal));
        assert_eq!(t.reset_calls, 1);
        assert_eq!(t.halt_clears, vec![0x81, 0x02]);
    }

    #[test]
    fn tag_mismatch_triggers_reset_recovery() {
        init_logging();
        let mut t = FakeTransport::new();
        t.push_in(ok_csw(Transactor::INITIAL_TAG + 1, 0, Csw::STATUS_PASSED));
        let mut xactor = Transactor::new();
        let err = xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap_err();
        assert!(matches!(err, Error::Internal));
        assert_eq!(t.reset_calls, 1);
    }

    #[test]
    fn failed_status_does_not_trigger_reset() {
        let mut t = FakeTransport::new();
        t.push_in(ok_csw(Transactor::INITIAL_TAG, 0, Csw::STATUS_FAILED));
        let mut xactor = Transactor::new();
        let err = xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap_err();
        assert!(matches!(err, Error::BadState));
        assert_eq!(t.reset_calls, 0);
    }

    #[test]
    fn phase_error_triggers_reset() {
        init_logging();
        let mut t = FakeTransport::new();
        t.push_in(ok_csw(Transactor::INITIAL_TAG, 0, Csw::STATUS_PHASE_ERROR));
        let mut xactor = Transactor::new();
        let err = xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap_err();
        assert!(matches!(err, Error::Internal));
        assert_eq!(t.reset_calls, 1);
    }

    #[test]
    fn tags_advance_across_calls() {
        let mut t = FakeTransport::new();
        t.push_in(ok_csw(Transactor::INITIAL_TAG, 0, Csw::STATUS_PASSED));
        t.push_in(ok_csw(Transactor::INITIAL_TAG + 1, 0, Csw::STATUS_PASSED));
        let mut xactor = Transactor::new();
        xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap();
        xactor.transact(&mut t, 0, &[0x00, 0, 0, 0, 0, 0], None).unwrap();
        assert_eq!(t.out_log.len(), 2);
        let tag0 = u32::from_le_bytes(t.out_log[0][4..8].try_into().unwrap());
        let tag1 = u32::from_le_bytes(t.out_log[1][4..8].try_into().unwrap());
        assert_eq!(tag1, tag0 + 1);
    }
}
