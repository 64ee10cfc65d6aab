use std::time::Duration;

use vxi11_protocol::{DeviceFlags, ReadReason};

use crate::error::{Error, ErrorCode, Status};

/// I/O timeout of a fresh [`CallContext`]
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a read stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TerminationReason {
    /// The buffer capacity (or requested count) was reached
    RequestedCount,
    /// The termination character was received
    TermChar,
    /// The instrument marked the end of its response
    End,
}

impl TerminationReason {
    /// Picks the reason reported to the caller when the instrument set several.
    /// END wins over the termination character, which wins over the request count.
    pub fn from_reason(reason: ReadReason) -> Option<TerminationReason> {
        if reason.contains(ReadReason::END) {
            Some(TerminationReason::End)
        } else if reason.contains(ReadReason::CHR) {
            Some(TerminationReason::TermChar)
        } else if reason.contains(ReadReason::REQCNT) {
            Some(TerminationReason::RequestedCount)
        } else {
            None
        }
    }
}

/// Parameters and results of a single operation on a controller or device link.
///
/// Inputs are kept between calls. Outputs are reset when an operation starts and
/// are only meaningful after it returned.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use vxi11_client::CallContext;
///
/// let mut ctx = CallContext::new();
/// ctx.set_io_timeout(Duration::from_secs(2))
///     .set_term_char(Some(b'\n'))
///     .set_wait_for_end(true);
/// assert_eq!(ctx.term_char(), Some(b'\n'));
/// assert!(ctx.status().is_ok());
/// ```
#[derive(Clone, Debug)]
pub struct CallContext {
    io_timeout: Duration,
    lock_timeout: Duration,
    term_char: Option<u8>,
    wait_for_end: bool,

    status: Status,
    bytes_transferred: usize,
    reason: Option<TerminationReason>,
}

impl Default for CallContext {
    fn default() -> Self {
        CallContext {
            io_timeout: DEFAULT_IO_TIMEOUT,
            lock_timeout: Duration::ZERO,
            term_char: None,
            wait_for_end: false,
            status: Status::ok(),
            bytes_transferred: 0,
            reason: None,
        }
    }
}

fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
}

impl CallContext {
    pub fn new() -> CallContext {
        CallContext::default()
    }

    /// Time the instrument may take to complete the I/O of one request
    pub fn set_io_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.io_timeout = timeout;
        self
    }

    /// Time to wait for a lock held by another link. Zero fails immediately.
    pub fn set_lock_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.lock_timeout = timeout;
        self
    }

    /// Termination character for reads, overriding the default of the link
    pub fn set_term_char(&mut self, term_char: Option<u8>) -> &mut Self {
        self.term_char = term_char;
        self
    }

    /// Keep reading until the instrument signals END (or the term char / capacity is reached)
    /// instead of returning after the first reply.
    pub fn set_wait_for_end(&mut self, wait: bool) -> &mut Self {
        self.wait_for_end = wait;
        self
    }

    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    pub fn term_char(&self) -> Option<u8> {
        self.term_char
    }

    pub fn wait_for_end(&self) -> bool {
        self.wait_for_end
    }

    /// Outcome of the last operation
    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn error_code(&self) -> ErrorCode {
        self.status.code()
    }

    /// Bytes written or read by the last operation, including partial transfers of failed ones
    pub fn bytes_transferred(&self) -> usize {
        self.bytes_transferred
    }

    /// Why the last read stopped. `None` after any other operation.
    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.reason
    }

    pub(crate) fn begin(&mut self) {
        self.status = Status::ok();
        self.bytes_transferred = 0;
        self.reason = None;
    }

    pub(crate) fn finish<T>(&mut self, result: Result<T, Error>) -> Result<T, Error> {
        self.status = match &result {
            Ok(_) => Status::ok(),
            Err(error) => Status::from(error),
        };
        result
    }

    pub(crate) fn set_transferred(&mut self, bytes: usize) {
        self.bytes_transferred = bytes;
    }

    pub(crate) fn set_reason(&mut self, reason: Option<TerminationReason>) {
        self.reason = reason;
    }

    pub(crate) fn io_timeout_ms(&self) -> u32 {
        millis(self.io_timeout)
    }

    pub(crate) fn lock_timeout_ms(&self) -> u32 {
        millis(self.lock_timeout)
    }

    /// WAITLOCK when the caller is willing to wait for a lock
    pub(crate) fn lock_flags(&self) -> DeviceFlags {
        if self.lock_timeout.is_zero() {
            DeviceFlags::empty()
        } else {
            DeviceFlags::WAITLOCK
        }
    }

    /// Client side bound of one round trip: the instrument's time budget plus `grace`.
    pub(crate) fn rpc_timeout(&self, grace: Duration) -> Duration {
        self.io_timeout
            .saturating_add(self.lock_timeout)
            .saturating_add(grace)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reason_priority() {
        let all = ReadReason::END | ReadReason::CHR | ReadReason::REQCNT;
        assert_eq!(
            TerminationReason::from_reason(all),
            Some(TerminationReason::End)
        );
        assert_eq!(
            TerminationReason::from_reason(ReadReason::CHR | ReadReason::REQCNT),
            Some(TerminationReason::TermChar)
        );
        assert_eq!(
            TerminationReason::from_reason(ReadReason::REQCNT),
            Some(TerminationReason::RequestedCount)
        );
        assert_eq!(TerminationReason::from_reason(ReadReason::empty()), None);
    }

    #[test]
    fn outputs_reset_on_begin() {
        let mut ctx = CallContext::new();
        ctx.set_transferred(12);
        ctx.set_reason(Some(TerminationReason::End));
        let _ = ctx.finish::<()>(Err(Error::new(ErrorCode::IoTimeout, "")));
        assert_eq!(ctx.error_code(), ErrorCode::IoTimeout);

        ctx.begin();
        assert!(ctx.status().is_ok());
        assert_eq!(ctx.bytes_transferred(), 0);
        assert_eq!(ctx.termination_reason(), None);
    }

    #[test]
    fn inputs_survive_calls() {
        let mut ctx = CallContext::new();
        ctx.set_lock_timeout(Duration::from_millis(250));
        ctx.begin();
        let _ = ctx.finish(Ok(()));
        assert_eq!(ctx.lock_timeout_ms(), 250);
        assert_eq!(ctx.lock_flags(), DeviceFlags::WAITLOCK);
    }

    #[test]
    fn timeouts_saturate() {
        let mut ctx = CallContext::new();
        ctx.set_io_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ctx.io_timeout_ms(), u32::MAX);
        assert_eq!(ctx.rpc_timeout(Duration::from_secs(1)), Duration::MAX);
    }

    #[test]
    fn rpc_timeout_adds_grace() {
        let mut ctx = CallContext::new();
        ctx.set_io_timeout(Duration::from_millis(500))
            .set_lock_timeout(Duration::from_millis(200));
        assert_eq!(
            ctx.rpc_timeout(Duration::from_millis(300)),
            Duration::from_secs(1)
        );
    }
}
