//! A connection to one device.
//!
//! A [`Session`] owns the transport, the accumulation buffers both subsystems
//! write into and the result buffers applications read from. Results only
//! change when [`Session::retrieve_3d`] or [`Session::retrieve_2d`] publish
//! new data, so accessors always return a consistent snapshot.

pub(crate) mod engine;

use std::{fmt, sync::Arc, time::Instant};

use flume::Receiver;

use crate::{
    channel::{Channel, Transport, TransportKind},
    config::{Capability, ReceiveMode, SessionConfig},
    diagnostics::Diagnostics,
    error::{BootloaderError, HmiError, Result, SystemError},
    event::DataEvent,
    message::Gesture2d,
    sensor3d::data::{
        self, AirWheel, Calibration, Frequency, Gesture, NoisePower, Position, SensorData, Signal,
        Touch,
    },
    touch2d::data::{Data2d, FingerPosition, Mouse, Rows},
};

use self::engine::{Reader, Shared};

/// Describes a successful data retrieval.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Refresh {
    /// The number of updates merged into this one since the previous
    /// retrieval.
    pub skipped: u32,
}

/// Represents a connection to a combined 2D touch and 3D gesture device.
pub struct Session {
    pub(crate) shared: Arc<Shared>,

    result_3d: SensorData,
    result_2d: Data2d,

    /// Whether the transport is open.
    connected: bool,

    /// The reader thread in [`ReceiveMode::Background`].
    reader: Option<Reader>,

    /// Wakes up retrievals waiting for the reader thread.
    frames: Option<Receiver<DataEvent>>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("shared", &self.shared)
            .field("connected", &self.connected)
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

impl Session {
    /// Creates a session on top of a transport. The transport is not opened
    /// yet.
    pub fn new(transport: Arc<dyn Transport>, config: SessionConfig) -> Self {
        let diagnostics = Arc::new(Diagnostics::new());
        let channel = Channel::new(transport, Arc::clone(&diagnostics));

        Self {
            shared: Arc::new(Shared::new(channel, diagnostics, config)),
            result_3d: SensorData::default(),
            result_2d: Data2d::default(),
            connected: false,
            reader: None,
            frames: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.shared.config
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.shared.channel.kind()
    }

    pub fn is_open(&self) -> bool {
        self.connected
    }

    /// Opens the transport. Starts the reader thread in
    /// [`ReceiveMode::Background`].
    ///
    /// Opening an open session does nothing.
    pub fn open(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        let transport = self.shared.channel.transport();
        transport.open().map_err(HmiError::Open)?;
        self.shared.channel.reset_framing();

        if self.shared.config.receive_mode == ReceiveMode::Background {
            self.shared.set_background(true);
            self.frames = Some(self.shared.events.create_wakeup());

            match Reader::spawn(Arc::clone(&self.shared)) {
                Ok(reader) => self.reader = Some(reader),
                Err(err) => {
                    self.shared.set_background(false);
                    self.frames = None;
                    transport.close();
                    return Err(HmiError::Open(Box::new(err)));
                },
            }
        }

        self.connected = true;
        Ok(())
    }

    /// Stops the reader thread and closes the transport.
    ///
    /// Closing a closed session does nothing.
    pub fn close(&mut self) {
        if !self.connected {
            return;
        }

        // Joins the reader thread.
        self.reader = None;
        self.shared.set_background(false);
        self.frames = None;

        self.shared.channel.transport().close();
        self.connected = false;
    }

    /// Closes the session and forgets all received data.
    pub fn cleanup(&mut self) {
        self.close();
        self.shared.clear();
        self.result_3d = SensorData::default();
        self.result_2d = Data2d::default();
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(HmiError::NotConnected)
        }
    }

    /// Checks that `capability` is enabled and the session is open.
    pub(crate) fn require(&self, capability: Capability) -> Result<()> {
        if !self.shared.config.capabilities.has(capability) {
            return Err(HmiError::NotImplemented(capability));
        }
        self.ensure_open()
    }

    /// Installs a hook receiving log lines, replacing a previous one.
    pub fn set_logger(&self, logger: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.diagnostics.set_logger(Box::new(logger));
    }

    pub fn clear_logger(&self) {
        self.shared.diagnostics.clear_logger();
    }

    /// Writes a line through the logging hook.
    ///
    /// Returns `false` if no hook is installed.
    pub fn log(&self, args: fmt::Arguments<'_>) -> bool {
        self.shared.diagnostics.log(args)
    }

    /// The number of malformed messages dropped so far.
    pub fn malformed_count(&self) -> u64 {
        self.shared.diagnostics.malformed_count()
    }

    /// Creates a receiver notified whenever new data arrives.
    ///
    /// The receiver must be drained regularly. It is removed once dropped.
    pub fn listen(&self) -> Receiver<DataEvent> {
        self.shared.events.create_receiver()
    }

    /// The last error code reported by the 3D subsystem.
    pub fn last_system_error(&self) -> Option<SystemError> {
        self.shared.last_system_error()
    }

    /// The last error code reported by the 2D bootloader.
    pub fn last_bootloader_error(&self) -> Option<BootloaderError> {
        self.shared.last_bootloader_error()
    }

    /// The number of undelivered reader wakeups.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn queued_wakeups(&self) -> usize {
        self.frames.as_ref().map_or(0, Receiver::len)
    }

    /// Waits up to the retrieve wait for `has_new` to report new data.
    fn await_data(&self, has_new: impl Fn(&Shared) -> bool) -> Result<bool> {
        let shared = &*self.shared;
        // Wakeups for frames that are already buffered are stale.
        if let Some(frames) = &self.frames {
            frames.drain().for_each(drop);
        }
        if has_new(shared) {
            return Ok(true);
        }
        let deadline = Instant::now() + shared.config.retrieve_wait;

        match &self.frames {
            Some(frames) => {
                while frames.recv_deadline(deadline).is_ok() {
                    if has_new(shared) {
                        return Ok(true);
                    }
                }
            },
            None => {
                shared.pump(deadline)?;
            },
        }

        Ok(has_new(shared))
    }

    /// Publishes new 3D data to the result buffer.
    ///
    /// Returns `Ok(None)` if no frame arrived since the last retrieval. The
    /// result buffer is unchanged in that case.
    pub fn retrieve_3d(&mut self) -> Result<Option<Refresh>> {
        self.require(Capability::Data3d)?;
        let last = self.result_3d.frame_counter;

        if !self.await_data(|shared| shared.lock_data_3d().data.frame_counter != last)? {
            return Ok(None);
        }

        let internal = self.shared.lock_data_3d().data;
        Ok(data::publish(&internal, last).map(|(result, skipped)| {
            self.result_3d = result;
            Refresh { skipped }
        }))
    }

    /// Publishes new 2D data to the result buffer.
    ///
    /// Returns `Ok(None)` if no message arrived since the last retrieval.
    pub fn retrieve_2d(&mut self) -> Result<Option<Refresh>> {
        self.require(Capability::Data2d)?;
        let last = self.result_2d.msg_counter;

        if !self.await_data(|shared| shared.lock_data_2d().data.msg_counter != last)? {
            return Ok(None);
        }

        let published = self.shared.lock_data_2d().publish(last);
        Ok(published.map(|result| {
            let skipped = result.msg_counter.wrapping_sub(last).wrapping_sub(1);
            self.result_2d = result;
            Refresh { skipped }
        }))
    }

    /// The complete published 3D snapshot.
    pub fn sensor_data(&self) -> &SensorData {
        &self.result_3d
    }

    pub fn position(&self) -> &Position {
        &self.result_3d.position
    }

    /// Uncalibrated signal of all electrodes.
    pub fn cic(&self) -> &Signal {
        &self.result_3d.cic
    }

    /// Signal deviation of all electrodes.
    pub fn sd(&self) -> &Signal {
        &self.result_3d.sd
    }

    pub fn gesture(&self) -> &Gesture {
        &self.result_3d.gesture
    }

    pub fn touch(&self) -> &Touch {
        &self.result_3d.touch
    }

    pub fn air_wheel(&self) -> &AirWheel {
        &self.result_3d.air_wheel
    }

    pub fn calibration(&self) -> &Calibration {
        &self.result_3d.calibration
    }

    pub fn frequency(&self) -> &Frequency {
        &self.result_3d.frequency
    }

    pub fn noise_power(&self) -> &NoisePower {
        &self.result_3d.noise_power
    }

    /// The complete published 2D snapshot.
    pub fn data_2d(&self) -> &Data2d {
        &self.result_2d
    }

    pub fn fingers(&self) -> &[FingerPosition] {
        self.result_2d.fingers.as_slice()
    }

    pub fn mouse(&self) -> &Mouse {
        &self.result_2d.mouse
    }

    pub fn gesture_2d(&self) -> Gesture2d {
        self.result_2d.gesture
    }

    pub fn rows(&self) -> &Rows {
        &self.result_2d.rows
    }
}
