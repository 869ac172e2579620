//! State shared between a session, its message handlers and the reader
//! thread, together with the command/response engine.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use flume::Receiver;
use tracing::{debug, warn};

use crate::{
    channel::{Channel, ChannelError, Inbound, TransportKind},
    codec::Wire,
    config::{RETRIES_2D, RETRIES_3D, SessionConfig},
    diagnostics::Diagnostics,
    error::{BootloaderError, HmiError, Result, SystemError},
    event::{DataEvent, EventEmitter},
    message::OutboundId2d,
    pending::Slot,
    sensor3d::{self, VersionInfo3d, data::Accumulator3d, update::UpdateSession},
    touch2d::{self, VersionInfo2d, data::Accumulator2d},
};

/// Requests waiting for a response, one slot per kind.
#[derive(Default)]
pub(crate) struct Pending {
    /// Keyed by the id of the instruction waiting for its System-Status.
    pub status_3d: Slot<u8, SystemError>,

    /// Keyed by the parameter id.
    pub param_3d: Slot<u16, (u32, u32)>,

    pub version_3d: Slot<(), VersionInfo3d>,

    /// Keyed by the id of the instruction waiting for its Ack.
    pub ack_2d: Slot<u8, ()>,

    /// Keyed by the parameter id.
    pub param_2d: Slot<u16, u32>,

    pub version_2d: Slot<(), VersionInfo2d>,

    pub update_2d: Slot<(), BootloaderError>,
}

/// Everything message handlers and callers both touch.
pub(crate) struct Shared {
    pub channel: Channel,
    pub diagnostics: Arc<Diagnostics>,
    pub config: SessionConfig,
    pub pending: Pending,
    pub events: EventEmitter<DataEvent>,
    pub update_3d: Mutex<UpdateSession>,

    data_3d: Mutex<Accumulator3d>,
    data_2d: Mutex<Accumulator2d>,

    /// Held for the duration of an instruction, so only one caller at a time
    /// registers pending requests.
    command: Mutex<()>,

    /// Whether a reader thread owns the receive path.
    background: AtomicBool,

    last_system_error: Mutex<Option<SystemError>>,
    last_bootloader_error: Mutex<Option<BootloaderError>>,
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("kind", &self.channel.kind())
            .field("config", &self.config)
            .field("background", &self.is_background())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub fn new(channel: Channel, diagnostics: Arc<Diagnostics>, config: SessionConfig) -> Self {
        Self {
            channel,
            diagnostics,
            config,
            pending: Pending::default(),
            events: EventEmitter::new(),
            update_3d: Mutex::default(),
            data_3d: Mutex::default(),
            data_2d: Mutex::default(),
            command: Mutex::new(()),
            background: AtomicBool::new(false),
            last_system_error: Mutex::new(None),
            last_bootloader_error: Mutex::new(None),
        }
    }

    pub fn lock_data_3d(&self) -> MutexGuard<'_, Accumulator3d> {
        lock(&self.data_3d)
    }

    pub fn lock_data_2d(&self) -> MutexGuard<'_, Accumulator2d> {
        lock(&self.data_2d)
    }

    /// Serializes instructions. Must not be taken twice by the same caller.
    pub fn command(&self) -> MutexGuard<'_, ()> {
        lock(&self.command)
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::Acquire)
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::Release);
    }

    pub fn record_system_error(&self, code: SystemError) {
        *lock(&self.last_system_error) = Some(code);
    }

    pub fn last_system_error(&self) -> Option<SystemError> {
        *lock(&self.last_system_error)
    }

    pub fn record_bootloader_error(&self, code: BootloaderError) {
        *lock(&self.last_bootloader_error) = Some(code);
    }

    pub fn last_bootloader_error(&self) -> Option<BootloaderError> {
        *lock(&self.last_bootloader_error)
    }

    /// Forgets everything received so far.
    pub fn clear(&self) {
        *lock(&self.data_3d) = Accumulator3d::default();
        *lock(&self.data_2d) = Accumulator2d::default();
        *lock(&self.update_3d) = UpdateSession::default();
        *lock(&self.last_system_error) = None;
        *lock(&self.last_bootloader_error) = None;
        self.channel.reset_framing();
    }

    /// Hands a received message to the handler of its subsystem.
    pub fn dispatch(&self, msg: Inbound) {
        match msg {
            Inbound::Sensor3d(msg) => sensor3d::handle(self, &msg),
            Inbound::Touch2d(msg) => touch2d::handle(self, &msg),
        }
    }

    /// Receives and dispatches a single message, waiting until `deadline`.
    ///
    /// Returns whether a message was dispatched.
    pub fn pump(&self, deadline: Instant) -> Result<bool> {
        match self.channel.receive(Some(deadline))? {
            Some(msg) => {
                self.dispatch(msg);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    /// Waits for a value delivered to `rx`.
    ///
    /// Without a reader thread the calling thread receives and dispatches
    /// messages itself until the value arrives or the deadline passes.
    /// Returns `None` on timeout.
    pub fn wait_for<V>(&self, rx: &Receiver<V>, deadline: Instant) -> Result<Option<V>> {
        loop {
            if let Ok(value) = rx.try_recv() {
                return Ok(Some(value));
            }

            if self.is_background() {
                return Ok(rx.recv_deadline(deadline).ok());
            }

            if !self.pump(deadline)? {
                return Ok(rx.try_recv().ok());
            }
        }
    }

    /// Runs `attempt` until it succeeds, at most `attempts` times.
    ///
    /// Returns the error of the last attempt if none succeeded.
    pub fn retry<T>(
        &self,
        what: &'static str,
        attempts: usize,
        mut attempt: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut last = HmiError::NoResponse;
        for n in 1..=attempts {
            match attempt() {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(what, attempt = n, error = %err, "attempt failed");
                    last = err;
                },
            }
        }

        warn!(what, attempts, error = %last, "giving up");
        Err(last)
    }

    /// Sends a 3D instruction until the subsystem acknowledges it with
    /// success.
    ///
    /// The caller holds the command lock.
    pub fn send_3d(&self, msg: &[u8]) -> Result<()> {
        let id = Wire::u8(msg, 3);

        self.retry("3D instruction", RETRIES_3D, || {
            let (_pending, rx) = self.pending.status_3d.register(id);
            self.channel.write_3d(msg)?;

            let deadline = Instant::now() + self.config.command_timeout;
            match self.wait_for(&rx, deadline)? {
                None => Err(HmiError::NoResponse),
                Some(SystemError::NoError) => Ok(()),
                Some(code) => Err(HmiError::System(code)),
            }
        })
    }

    /// Sends a 2D instruction until the subsystem acknowledges it.
    ///
    /// The caller holds the command lock.
    pub fn send_2d(&self, id: OutboundId2d, payload: &[u8]) -> Result<()> {
        if self.channel.kind() == TransportKind::Stream {
            return Err(ChannelError::Unsupported2d.into());
        }
        let ack = u8::from(id);

        self.retry("2D instruction", RETRIES_2D, || {
            let (_pending, rx) = self.pending.ack_2d.register(ack);
            self.channel.write_2d(id, payload)?;

            let deadline = Instant::now() + self.config.command_timeout;
            self.wait_for(&rx, deadline)?.ok_or(HmiError::NoResponse)
        })
    }

    pub fn reset_3d(&self) -> Result<()> {
        self.channel.reset()?;
        Ok(())
    }
}

/// The background reader thread.
///
/// The thread is stopped and joined when this drops.
pub(crate) struct Reader {
    /// Signals the thread to stop after its current read.
    stop: Arc<AtomicBool>,

    /// The handle to the thread. Joined after signaling [`Self::stop`].
    handle: Option<JoinHandle<()>>,
}

impl Reader {
    pub fn spawn(shared: Arc<Shared>) -> std::io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));

        let handle = thread::Builder::new()
            .name("touchpad3d-reader".into())
            .spawn({
                let stop = Arc::clone(&stop);
                move || {
                    while !stop.load(Ordering::Acquire) {
                        let deadline = Instant::now() + shared.config.reader_poll;
                        if let Err(err) = shared.pump(deadline) {
                            warn!(error = %err, "reading from the transport failed");
                            // Back off instead of spinning on a broken transport.
                            thread::sleep(shared.config.reader_poll);
                        }
                    }
                }
            })?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            // A panicked reader has nothing left to clean up.
            let _ = handle.join();
        }
    }
}
