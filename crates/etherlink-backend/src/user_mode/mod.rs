//! Backend driving an embedded user-mode IP stack.
//!
//! The stack runs on two helper threads (see `bridge`) and talks to the rest of the adapter
//! through two byte-stream queues carrying length-prefixed frames: guest → stack frames written
//! by [`EtherBackend::send`], and stack → guest frames read by the reception pipeline through
//! [`EtherBackend::receive_blocking`] like any other backend's traffic.

use std::io;
use std::os::fd::{AsFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use bitflags::bitflags;
use etherlink_frame::{Frame, MacAddr, ETH_MAX_FRAME_LEN};

use crate::cancel::CancelFlag;
use crate::error::{OpenError, RecvError, SendError};
use crate::report::{Severity, WarningSink};
use crate::{sys, BackendKind, EtherBackend};

mod bridge;
mod queue;
pub mod redirect;

pub use redirect::{RedirectError, RedirectProtocol, RedirectRule, DEFAULT_GUEST_ADDR};

pub const USER_MODE_MAC: MacAddr = MacAddr::new([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

/// How long a queue write may stall before the frame is given up.
const QUEUE_WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// The embedded stack, supplied by the host.
///
/// All calls are serialized; the stack never sees two of them at once.
pub trait UserModeStack: Send {
    fn add_redirect(&mut self, rule: &RedirectRule) -> io::Result<()>;

    /// Hand one guest frame to the stack.
    fn input(&mut self, frame: &[u8], output: &StackOutput);

    /// Register the descriptors the stack is waiting on. The returned duration, if any, is the
    /// longest the caller should wait before calling [`UserModeStack::process_poll_set`].
    fn fill_poll_set(&mut self, set: &mut PollSet) -> Option<Duration>;

    /// Act on the readiness recorded in `set` (also called after a timeout, for stack timers).
    fn process_poll_set(&mut self, set: &PollSet, output: &StackOutput);
}

/// Stack handle kept by the owner across reopen; each backend locks it from its helper threads.
pub type SharedStack = Arc<Mutex<Box<dyn UserModeStack>>>;

pub fn shared_stack(stack: impl UserModeStack + 'static) -> SharedStack {
    Arc::new(Mutex::new(Box::new(stack)))
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PollEvents: libc::c_short {
        const READABLE = libc::POLLIN;
        const PRIORITY = libc::POLLPRI;
        const WRITABLE = libc::POLLOUT;
        const ERROR = libc::POLLERR;
        const HANGUP = libc::POLLHUP;
    }
}

/// Descriptor interest list the stack fills before every wait.
#[derive(Default)]
pub struct PollSet {
    fds: Vec<libc::pollfd>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot index to query with [`PollSet::readiness`].
    pub fn register(&mut self, fd: RawFd, interest: PollEvents) -> usize {
        self.fds.push(libc::pollfd {
            fd,
            events: interest.bits(),
            revents: 0,
        });
        self.fds.len() - 1
    }

    pub fn readiness(&self, index: usize) -> PollEvents {
        self.fds
            .get(index)
            .map(|fd| PollEvents::from_bits_truncate(fd.revents))
            .unwrap_or_else(PollEvents::empty)
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn clear(&mut self) {
        self.fds.clear();
    }

    pub(crate) fn wait(&mut self, timeout: Duration) -> io::Result<usize> {
        sys::poll(&mut self.fds, timeout)
    }
}

/// Sink through which the stack delivers frames toward the guest.
#[derive(Clone)]
pub struct StackOutput {
    stream: Arc<Mutex<UnixStream>>,
}

impl StackOutput {
    pub fn emit(&self, frame: &[u8]) -> io::Result<()> {
        let mut stream = self
            .stream
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue::write_record(&mut *stream, frame)
    }
}

pub(crate) struct StackShared {
    stack: SharedStack,
    inbound: UnixStream,
    output: StackOutput,
    use_stack_timeout: bool,
}

impl StackShared {
    fn lock_stack(&self) -> MutexGuard<'_, Box<dyn UserModeStack>> {
        self.stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct UserModeBackend {
    shared: Arc<StackShared>,
    to_stack: Mutex<UnixStream>,
    from_stack: Mutex<UnixStream>,
    closed: AtomicBool,
}

impl UserModeBackend {
    /// Install `redirects` and create the queues. Bad rules are reported, not fatal.
    pub fn open(
        stack: SharedStack,
        redirects: &[String],
        use_stack_timeout: bool,
        warnings: &dyn WarningSink,
    ) -> Result<Self, OpenError> {
        let mut guard = stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for text in redirects {
            match text.parse::<RedirectRule>() {
                Ok(rule) => {
                    if let Err(err) = guard.add_redirect(&rule) {
                        tracing::debug!(%rule, "stack rejected redirect: {err}");
                        warnings.report(
                            Severity::Warning,
                            &format!("could not set up host forwarding rule '{text}'"),
                        );
                    }
                }
                Err(err) => {
                    tracing::debug!(rule = %text, "{err}");
                    warnings.report(
                        Severity::Warning,
                        &format!("invalid host forwarding rule '{text}'"),
                    );
                }
            }
        }
        drop(guard);

        let (to_stack, inbound) = UnixStream::pair().map_err(OpenError::Queue)?;
        let (outbound, from_stack) = UnixStream::pair().map_err(OpenError::Queue)?;
        to_stack
            .set_write_timeout(Some(QUEUE_WRITE_TIMEOUT))
            .map_err(OpenError::Queue)?;
        outbound
            .set_write_timeout(Some(QUEUE_WRITE_TIMEOUT))
            .map_err(OpenError::Queue)?;

        Ok(Self {
            shared: Arc::new(StackShared {
                stack,
                inbound,
                output: StackOutput {
                    stream: Arc::new(Mutex::new(outbound)),
                },
                use_stack_timeout,
            }),
            to_stack: Mutex::new(to_stack),
            from_stack: Mutex::new(from_stack),
            closed: AtomicBool::new(false),
        })
    }
}

impl EtherBackend for UserModeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::UserModeStack
    }

    fn hardware_address(&self) -> MacAddr {
        USER_MODE_MAC
    }

    fn send(&self, frame: &[u8]) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed);
        }
        if frame.len() > ETH_MAX_FRAME_LEN {
            return Err(SendError::TooLong {
                len: frame.len(),
                max: ETH_MAX_FRAME_LEN,
            });
        }
        let mut stream = self
            .to_stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        queue::write_record(&mut *stream, frame).map_err(SendError::from_io)
    }

    fn receive_blocking(&self, timeout: Duration) -> Result<Option<Frame>, RecvError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(RecvError::Closed);
        }
        let mut stream = self
            .from_stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !sys::wait_readable(stream.as_fd(), timeout)? {
            return Ok(None);
        }
        match queue::read_record(&mut *stream) {
            Ok(frame) => Ok(Some(Frame::from_vec(frame))),
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Err(RecvError::Closed),
            Err(err) => Err(err.into()),
        }
    }

    fn spawn_workers(&self, cancel: &CancelFlag) -> io::Result<Vec<JoinHandle<()>>> {
        bridge::spawn(&self.shared, cancel)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let to_stack = self
            .to_stack
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // Already-closed peers are fine here.
        let _ = to_stack.shutdown(std::net::Shutdown::Both);
        tracing::debug!("user-mode stack queues closed");
    }
}
