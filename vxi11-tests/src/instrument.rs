use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use vxi11_protocol::{
    CreateLinkParms, CreateLinkResp, DOCMD_REN, DeviceDocmdParms, DeviceDocmdResp, DeviceError,
    DeviceErrorCode, DeviceFlags, DeviceGenericParms, DeviceLockParms, DeviceReadParms,
    DeviceReadResp, DeviceReadStbResp, DeviceWriteParms, DeviceWriteResp, LinkId, Procedure,
    ReadReason,
    codec::{Decode, Encode},
    error::ReadError,
};

/// Response of the simulated instrument to `*idn?`
pub const IDN: &str = "VXI11-SIM,Simulated Instrument,0,1.0";

/// Message available bit of the status byte
const MAV: u8 = 0x10;

#[derive(Debug, Clone)]
pub struct InstrumentConfig {
    /// Largest write accepted in one `device_write`
    pub max_recv_size: u32,
    /// Largest chunk returned by one `device_read`
    pub max_read_size: usize,
    /// Length of the response to `*lrn?`
    pub learn_len: usize,
    pub max_links: usize,
    pub status_byte: u8,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            max_recv_size: 1024,
            max_read_size: 1024,
            learn_len: 5000,
            max_links: 16,
            status_byte: 0x40,
        }
    }
}

#[derive(Debug, Default)]
struct Link {
    device: String,
    input: Vec<u8>,
    responses: VecDeque<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    next_lid: u32,
    abort_port: u16,
    links: HashMap<u32, Link>,
    lock: Option<u32>,
    aborted: HashSet<u32>,
    blocked_reads: usize,
    remote_enable: bool,
    calls: Vec<Procedure>,
}

#[derive(Debug, Default)]
struct Inner {
    config: InstrumentConfig,
    state: Mutex<State>,
    changed: Condvar,
}

/// A simulated VXI-11 instrument.
///
/// Answers `*idn?` with [`IDN`] and `*lrn?` with a long learn string; any other message is
/// echoed back. Reads block until a response is queued, the I/O timeout expires or the
/// link is aborted. Clones share the same instrument.
#[derive(Debug, Clone, Default)]
pub struct Instrument {
    inner: Arc<Inner>,
}

type Waited<T> = Result<T, DeviceErrorCode>;

impl Instrument {
    pub fn new(config: InstrumentConfig) -> Instrument {
        Instrument {
            inner: Arc::new(Inner {
                config,
                ..Default::default()
            }),
        }
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.inner.config
    }

    /// Port reported as abort port in `create_link`
    pub fn set_abort_port(&self, port: u16) {
        self.inner.state.lock().abort_port = port;
    }

    pub fn remote_enable(&self) -> bool {
        self.inner.state.lock().remote_enable
    }

    pub fn link_count(&self) -> usize {
        self.inner.state.lock().links.len()
    }

    pub fn lock_holder(&self) -> Option<LinkId> {
        self.inner.state.lock().lock.map(LinkId)
    }

    /// Device names of the open links
    pub fn devices(&self) -> Vec<String> {
        let state = self.inner.state.lock();
        let mut devices: Vec<_> = state.links.values().map(|link| link.device.clone()).collect();
        devices.sort();
        devices
    }

    /// How often `procedure` was called
    pub fn calls(&self, procedure: Procedure) -> usize {
        self.inner
            .state
            .lock()
            .calls
            .iter()
            .filter(|call| **call == procedure)
            .count()
    }

    /// The response to `*lrn?`
    pub fn learn_string(&self) -> Vec<u8> {
        let len = self.inner.config.learn_len;
        let mut learn: Vec<u8> = (0..len.saturating_sub(1))
            .map(|i| b'A' + (i % 26) as u8)
            .collect();
        if len > 0 {
            learn.push(b'\n');
        }
        learn
    }

    /// Waits until a read blocks waiting for a response. Returns false on timeout.
    pub fn wait_for_blocked_read(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.blocked_reads == 0 {
            if self
                .inner
                .changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.blocked_reads > 0;
            }
        }
        true
    }

    /// Runs `procedure` with XDR encoded `args` and returns the encoded result.
    /// Blocks for as long as the instrument would.
    pub fn handle(&self, procedure: Procedure, args: &[u8]) -> Result<Vec<u8>, ReadError> {
        log::debug!("Instrument received {:?}", procedure);
        self.inner.state.lock().calls.push(procedure);
        let reply = match procedure {
            Procedure::CreateLink => self.create_link(CreateLinkParms::from_bytes(args)?).to_bytes(),
            Procedure::DeviceWrite => self.write(DeviceWriteParms::from_bytes(args)?).to_bytes(),
            Procedure::DeviceRead => self.read(DeviceReadParms::from_bytes(args)?).to_bytes(),
            Procedure::DeviceReadStb => {
                self.read_stb(DeviceGenericParms::from_bytes(args)?).to_bytes()
            }
            Procedure::DeviceTrigger | Procedure::DeviceRemote | Procedure::DeviceLocal => {
                let parms = DeviceGenericParms::from_bytes(args)?;
                device_error(self.generic(&parms, |_| ())).to_bytes()
            }
            Procedure::DeviceClear => {
                let parms = DeviceGenericParms::from_bytes(args)?;
                device_error(self.generic(&parms, |link| {
                    link.input.clear();
                    link.responses.clear();
                }))
                .to_bytes()
            }
            Procedure::DeviceLock => {
                device_error(self.lock(DeviceLockParms::from_bytes(args)?)).to_bytes()
            }
            Procedure::DeviceUnlock => device_error(self.unlock(LinkId::from_bytes(args)?)).to_bytes(),
            Procedure::DeviceDocmd => self.docmd(DeviceDocmdParms::from_bytes(args)?).to_bytes(),
            Procedure::DestroyLink => {
                device_error(self.destroy_link(LinkId::from_bytes(args)?)).to_bytes()
            }
            Procedure::DeviceAbort => device_error(self.abort(LinkId::from_bytes(args)?)).to_bytes(),
        };
        Ok(reply?)
    }

    fn create_link(&self, parms: CreateLinkParms) -> CreateLinkResp {
        let mut state = self.inner.state.lock();
        if state.links.len() >= self.inner.config.max_links {
            return CreateLinkResp {
                error: DeviceErrorCode::OutOfResources,
                ..Default::default()
            };
        }
        state.next_lid += 1;
        let lid = state.next_lid;
        state.links.insert(
            lid,
            Link {
                device: parms.device,
                ..Default::default()
            },
        );
        CreateLinkResp {
            error: DeviceErrorCode::NoError,
            lid: LinkId(lid),
            abort_port: state.abort_port,
            max_recv_size: self.inner.config.max_recv_size,
        }
    }

    /// Waits for the lock when another link holds it and the caller asked to wait.
    fn acquire(
        &self,
        state: &mut MutexGuard<'_, State>,
        lid: LinkId,
        flags: DeviceFlags,
        lock_timeout: u32,
    ) -> Waited<()> {
        if !state.links.contains_key(&lid.0) {
            return Err(DeviceErrorCode::InvalidLinkIdentifier);
        }
        let deadline = Instant::now() + Duration::from_millis(lock_timeout.into());
        loop {
            match state.lock {
                None => return Ok(()),
                Some(holder) if holder == lid.0 => return Ok(()),
                Some(_) => {}
            }
            if !flags.contains(DeviceFlags::WAITLOCK) || Instant::now() >= deadline {
                return Err(DeviceErrorCode::DeviceLockedByAnotherLink);
            }
            self.inner.changed.wait_until(state, deadline);
        }
    }

    fn write(&self, parms: DeviceWriteParms) -> DeviceWriteResp {
        let mut state = self.inner.state.lock();
        if let Err(error) = self.acquire(&mut state, parms.lid, parms.flags, parms.lock_timeout) {
            return DeviceWriteResp { error, size: 0 };
        }
        let Some(link) = state.links.get_mut(&parms.lid.0) else {
            return DeviceWriteResp {
                error: DeviceErrorCode::InvalidLinkIdentifier,
                size: 0,
            };
        };
        let accepted = parms.data.len().min(self.inner.config.max_recv_size as usize);
        link.input.extend_from_slice(&parms.data[..accepted]);
        if parms.flags.contains(DeviceFlags::END) && accepted == parms.data.len() {
            let message = std::mem::take(&mut link.input);
            let response = self.respond(&message);
            link.responses.push_back(response);
            self.inner.changed.notify_all();
        }
        DeviceWriteResp {
            error: DeviceErrorCode::NoError,
            size: accepted as u32,
        }
    }

    fn respond(&self, message: &[u8]) -> Vec<u8> {
        let command = String::from_utf8_lossy(message);
        match command.trim().to_ascii_lowercase().as_str() {
            "*idn?" => format!("{}\n", IDN).into_bytes(),
            "*lrn?" => self.learn_string(),
            _ => message.to_vec(),
        }
    }

    fn read(&self, parms: DeviceReadParms) -> DeviceReadResp {
        let mut state = self.inner.state.lock();
        if let Err(error) = self.acquire(&mut state, parms.lid, parms.flags, parms.lock_timeout) {
            return read_error(error);
        }
        let deadline = Instant::now() + Duration::from_millis(parms.io_timeout.into());
        loop {
            let Some(link) = state.links.get(&parms.lid.0) else {
                return read_error(DeviceErrorCode::InvalidLinkIdentifier);
            };
            if !link.responses.is_empty() {
                break;
            }
            if state.aborted.remove(&parms.lid.0) {
                return read_error(DeviceErrorCode::Abort);
            }
            if Instant::now() >= deadline {
                return read_error(DeviceErrorCode::IoTimeout);
            }
            state.blocked_reads += 1;
            self.inner.changed.notify_all();
            self.inner.changed.wait_until(&mut state, deadline);
            state.blocked_reads -= 1;
        }
        state.aborted.remove(&parms.lid.0);

        let max_read_size = self.inner.config.max_read_size;
        let Some(link) = state.links.get_mut(&parms.lid.0) else {
            return read_error(DeviceErrorCode::InvalidLinkIdentifier);
        };
        let Some(response) = link.responses.front_mut() else {
            return read_error(DeviceErrorCode::IoError);
        };
        let requested = parms.request_size as usize;
        let mut len = response.len().min(requested).min(max_read_size);
        let mut reason = ReadReason::empty();
        if parms.flags.contains(DeviceFlags::TERMCHRSET)
            && let Some(pos) = response[..len].iter().position(|b| *b == parms.term_char)
        {
            len = pos + 1;
            reason = reason | ReadReason::CHR;
        }
        let data: Vec<u8> = response.drain(..len).collect();
        if response.is_empty() {
            link.responses.pop_front();
            reason = reason | ReadReason::END;
        }
        if data.len() == requested {
            reason = reason | ReadReason::REQCNT;
        }
        DeviceReadResp {
            error: DeviceErrorCode::NoError,
            reason,
            data,
        }
    }

    fn read_stb(&self, parms: DeviceGenericParms) -> DeviceReadStbResp {
        let status_byte = self.inner.config.status_byte;
        match self.generic(&parms, |link| {
            if link.responses.is_empty() {
                status_byte
            } else {
                status_byte | MAV
            }
        }) {
            Ok(stb) => DeviceReadStbResp {
                error: DeviceErrorCode::NoError,
                stb,
            },
            Err(error) => DeviceReadStbResp { error, stb: 0 },
        }
    }

    fn generic<T>(&self, parms: &DeviceGenericParms, op: impl FnOnce(&mut Link) -> T) -> Waited<T> {
        let mut state = self.inner.state.lock();
        self.acquire(&mut state, parms.lid, parms.flags, parms.lock_timeout)?;
        state
            .links
            .get_mut(&parms.lid.0)
            .map(op)
            .ok_or(DeviceErrorCode::InvalidLinkIdentifier)
    }

    fn lock(&self, parms: DeviceLockParms) -> Waited<()> {
        let mut state = self.inner.state.lock();
        self.acquire(&mut state, parms.lid, parms.flags, parms.lock_timeout)?;
        state.lock = Some(parms.lid.0);
        Ok(())
    }

    fn unlock(&self, lid: LinkId) -> Waited<()> {
        let mut state = self.inner.state.lock();
        if !state.links.contains_key(&lid.0) {
            return Err(DeviceErrorCode::InvalidLinkIdentifier);
        }
        if state.lock != Some(lid.0) {
            return Err(DeviceErrorCode::NoLockHeldByThisLink);
        }
        state.lock = None;
        self.inner.changed.notify_all();
        Ok(())
    }

    fn docmd(&self, parms: DeviceDocmdParms) -> DeviceDocmdResp {
        let mut state = self.inner.state.lock();
        let error = match self.acquire(&mut state, parms.lid, parms.flags, parms.lock_timeout) {
            Err(error) => error,
            Ok(()) if parms.cmd == DOCMD_REN && parms.data_in.len() == 2 => {
                state.remote_enable = parms.data_in[1] != 0;
                DeviceErrorCode::NoError
            }
            Ok(()) => DeviceErrorCode::OperationNotSupported,
        };
        DeviceDocmdResp {
            error,
            data_out: Vec::new(),
        }
    }

    fn destroy_link(&self, lid: LinkId) -> Waited<()> {
        let mut state = self.inner.state.lock();
        state
            .links
            .remove(&lid.0)
            .ok_or(DeviceErrorCode::InvalidLinkIdentifier)?;
        state.aborted.remove(&lid.0);
        if state.lock == Some(lid.0) {
            state.lock = None;
        }
        self.inner.changed.notify_all();
        Ok(())
    }

    fn abort(&self, lid: LinkId) -> Waited<()> {
        let mut state = self.inner.state.lock();
        if !state.links.contains_key(&lid.0) {
            return Err(DeviceErrorCode::InvalidLinkIdentifier);
        }
        if state.blocked_reads > 0 {
            state.aborted.insert(lid.0);
            self.inner.changed.notify_all();
        }
        Ok(())
    }
}

fn device_error(result: Waited<()>) -> DeviceError {
    DeviceError {
        error: result.err().unwrap_or_default(),
    }
}

fn read_error(error: DeviceErrorCode) -> DeviceReadResp {
    DeviceReadResp {
        error,
        ..Default::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn link(instrument: &Instrument) -> LinkId {
        let resp = instrument.create_link(CreateLinkParms {
            client_id: 1,
            lock_device: false,
            lock_timeout: 0,
            device: "inst0".to_string(),
        });
        resp.lid
    }

    fn read_parms(lid: LinkId, request_size: u32) -> DeviceReadParms {
        DeviceReadParms {
            lid,
            request_size,
            io_timeout: 10,
            lock_timeout: 0,
            flags: DeviceFlags::empty(),
            term_char: 0,
        }
    }

    fn send(instrument: &Instrument, lid: LinkId, data: &[u8]) {
        let resp = instrument.write(DeviceWriteParms {
            lid,
            io_timeout: 10,
            lock_timeout: 0,
            flags: DeviceFlags::END,
            data: data.to_vec(),
        });
        assert_eq!(resp.size as usize, data.len());
    }

    #[test]
    fn idn_query() {
        let instrument = Instrument::default();
        let lid = link(&instrument);
        send(&instrument, lid, b"*IDN?\n");
        let resp = instrument.read(read_parms(lid, 100));
        assert_eq!(resp.data, format!("{}\n", IDN).into_bytes());
        assert_eq!(resp.reason, ReadReason::END);
    }

    #[test]
    fn read_without_response_times_out() {
        let instrument = Instrument::default();
        let lid = link(&instrument);
        let resp = instrument.read(read_parms(lid, 100));
        assert_eq!(resp.error, DeviceErrorCode::IoTimeout);
    }

    #[test]
    fn read_stops_at_term_char() {
        let instrument = Instrument::default();
        let lid = link(&instrument);
        send(&instrument, lid, b"1;2;3");
        let mut parms = read_parms(lid, 100);
        parms.flags = DeviceFlags::TERMCHRSET;
        parms.term_char = b';';
        let resp = instrument.read(parms);
        assert_eq!(resp.data, b"1;");
        assert_eq!(resp.reason, ReadReason::CHR);
    }

    #[test]
    fn lock_is_exclusive() {
        let instrument = Instrument::default();
        let first = link(&instrument);
        let second = link(&instrument);
        let lock = |lid| {
            instrument.lock(DeviceLockParms {
                lid,
                flags: DeviceFlags::empty(),
                lock_timeout: 0,
            })
        };
        assert_eq!(lock(first), Ok(()));
        assert_eq!(lock(second), Err(DeviceErrorCode::DeviceLockedByAnotherLink));
        assert_eq!(
            instrument.unlock(second),
            Err(DeviceErrorCode::NoLockHeldByThisLink)
        );
        assert_eq!(instrument.destroy_link(first), Ok(()));
        assert_eq!(lock(second), Ok(()));
    }

    #[test]
    fn stb_reports_message_available() {
        let instrument = Instrument::default();
        let lid = link(&instrument);
        let parms = DeviceGenericParms {
            lid,
            flags: DeviceFlags::empty(),
            lock_timeout: 0,
            io_timeout: 0,
        };
        assert_eq!(instrument.read_stb(parms.clone()).stb & MAV, 0);
        send(&instrument, lid, b"x");
        assert_eq!(instrument.read_stb(parms).stb & MAV, MAV);
    }
}
