//! Helpers for testing code that talks to a device.
//!
//! [`MockTransport`] plays the device side of a transport: it decodes what a
//! session writes and feeds back whatever its responder answers. The builders
//! produce well-formed 3D messages.

use std::{
    fmt,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use flume::{Receiver, RecvTimeoutError, Sender};

use crate::{
    channel::{Transport, TransportError, TransportKind},
    codec::Wire,
    diagnostics::Diagnostics,
    error::SystemError,
    framing::{
        packet::{self, PacketExtractor},
        stream::{self, StreamExtractor},
    },
    message::{MessageId3d, OutboundId2d, OutputMask, SystemInfo},
    sensor3d::data::CHANNELS,
};

/// Builds a Sensor-Data-Output message.
///
/// The output configuration is derived from the fields that were set. Fields
/// forced through [`SensorFrame::mask`] without a value are written as zeros,
/// fields outside of [`SensorFrame::only`] are left out.
#[derive(Clone, Debug)]
pub struct SensorFrame {
    timestamp: u8,
    info: SystemInfo,
    electrodes: usize,
    forced: OutputMask,
    only: OutputMask,
    dsp_status: Option<(u8, u8)>,
    gesture: Option<u32>,
    touch: Option<u32>,
    air_wheel: Option<u8>,
    position: Option<(u16, u16, u16)>,
    noise_power: Option<f32>,
    cic: Option<[f32; CHANNELS]>,
    sd: Option<[f32; CHANNELS]>,
}

impl SensorFrame {
    pub fn new(timestamp: u8) -> Self {
        Self {
            timestamp,
            info: SystemInfo::empty(),
            electrodes: 5,
            forced: OutputMask::empty(),
            only: OutputMask::all(),
            dsp_status: None,
            gesture: None,
            touch: None,
            air_wheel: None,
            position: None,
            noise_power: None,
            cic: None,
            sd: None,
        }
    }

    pub fn info(mut self, info: SystemInfo) -> Self {
        self.info = info;
        self
    }

    /// Announces 4 or 5 active electrodes.
    pub fn electrodes(mut self, count: usize) -> Self {
        assert!(count == 4 || count == 5, "4 or 5 electrodes");
        self.electrodes = count;
        self
    }

    /// Includes the fields of `mask` even if no value was set.
    pub fn mask(mut self, mask: OutputMask) -> Self {
        self.forced |= mask;
        self
    }

    /// Leaves out every field not in `mask`, even if a value was set.
    pub fn only(mut self, mask: OutputMask) -> Self {
        self.only = mask;
        self
    }

    pub fn dsp_status(mut self, calibration: u8, frequency: u8) -> Self {
        self.dsp_status = Some((calibration, frequency));
        self
    }

    pub fn gesture(mut self, gesture_info: u32) -> Self {
        self.gesture = Some(gesture_info);
        self
    }

    pub fn touch(mut self, touch_info: u32) -> Self {
        self.touch = Some(touch_info);
        self
    }

    pub fn air_wheel(mut self, counter: u8) -> Self {
        self.air_wheel = Some(counter);
        self
    }

    pub fn position(mut self, x: u16, y: u16, z: u16) -> Self {
        self.position = Some((x, y, z));
        self
    }

    pub fn noise_power(mut self, value: f32) -> Self {
        self.noise_power = Some(value);
        self
    }

    pub fn cic(mut self, channels: [f32; CHANNELS]) -> Self {
        self.cic = Some(channels);
        self
    }

    pub fn sd(mut self, channels: [f32; CHANNELS]) -> Self {
        self.sd = Some(channels);
        self
    }

    /// The output configuration the message will carry.
    pub fn config(&self) -> OutputMask {
        let set = [
            (OutputMask::DSP_STATUS, self.dsp_status.is_some()),
            (OutputMask::GESTURE_INFO, self.gesture.is_some()),
            (OutputMask::TOUCH_INFO, self.touch.is_some()),
            (OutputMask::AIR_WHEEL_INFO, self.air_wheel.is_some()),
            (OutputMask::POSITION, self.position.is_some()),
            (OutputMask::NOISE_POWER, self.noise_power.is_some()),
            (OutputMask::CIC_DATA, self.cic.is_some()),
            (OutputMask::SD_DATA, self.sd.is_some()),
        ];

        let mut config = (self.forced & !OutputMask::ELECTRODE_CONFIGURATION)
            | set
                .into_iter()
                .filter(|(_, present)| *present)
                .fold(OutputMask::empty(), |mask, (flag, _)| mask | flag);
        config &= self.only;
        if self.electrodes == 5 {
            config |= OutputMask::from_bits_retain(0x0100);
        }
        config
    }

    pub fn build(&self) -> Vec<u8> {
        let config = self.config();
        let mut msg = vec![0u8; 8];
        msg[3] = MessageId3d::SensorDataOutput.into();
        Wire::put_u16(&mut msg, 4, config.bits());
        msg[6] = self.timestamp;
        msg[7] = self.info.bits();

        if config.contains(OutputMask::DSP_STATUS) {
            let (calibration, frequency) = self.dsp_status.unwrap_or_default();
            msg.extend([calibration, frequency]);
        }
        if config.contains(OutputMask::GESTURE_INFO) {
            msg.extend(self.gesture.unwrap_or_default().to_le_bytes());
        }
        if config.contains(OutputMask::TOUCH_INFO) {
            msg.extend(self.touch.unwrap_or_default().to_le_bytes());
        }
        if config.contains(OutputMask::AIR_WHEEL_INFO) {
            msg.extend([self.air_wheel.unwrap_or_default(), 0]);
        }
        if config.contains(OutputMask::POSITION) {
            let (x, y, z) = self.position.unwrap_or_default();
            for v in [x, y, z] {
                msg.extend(v.to_le_bytes());
            }
        }
        if config.contains(OutputMask::NOISE_POWER) {
            msg.extend(self.noise_power.unwrap_or_default().to_le_bytes());
        }
        for (flag, signal) in [(OutputMask::CIC_DATA, self.cic), (OutputMask::SD_DATA, self.sd)] {
            if config.contains(flag) {
                for v in &signal.unwrap_or_default()[..self.electrodes] {
                    msg.extend(v.to_le_bytes());
                }
            }
        }

        msg[0] = msg.len() as u8;
        msg
    }
}

/// Builds a System-Status message answering the instruction `msg_id`.
pub fn status(msg_id: u8, code: SystemError) -> Vec<u8> {
    let mut msg = vec![0u8; 16];
    msg[0] = 16;
    msg[3] = MessageId3d::SystemStatus.into();
    msg[4] = msg_id;
    Wire::put_u16(&mut msg, 6, code.into());
    msg
}

/// Builds a Fw-Version-Info message.
pub fn version_info(fw_valid: u8, version: &str) -> Vec<u8> {
    let mut msg = vec![0u8; 132];
    msg[0] = 132;
    msg[3] = MessageId3d::FwVersionInfo.into();
    msg[4] = fw_valid;
    let len = version.len().min(120);
    msg[12..12 + len].copy_from_slice(&version.as_bytes()[..len]);
    msg
}

/// Builds a Set-Runtime-Parameter message as sent in response to a request.
pub fn runtime_param(param: u16, arg0: u32, arg1: u32) -> Vec<u8> {
    let mut msg = vec![0u8; 16];
    msg[0] = 16;
    msg[3] = MessageId3d::SetRuntimeParameter.into();
    Wire::put_u16(&mut msg, 4, param);
    Wire::put_u32(&mut msg, 8, arg0);
    Wire::put_u32(&mut msg, 12, arg1);
    msg
}

/// A message written by a session, as seen by the device.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Outgoing {
    /// A 3D message, starting with its size byte.
    Sensor3d(Vec<u8>),

    /// A 2D message with its id and payload.
    Touch2d(u8, Vec<u8>),

    /// A reset of the 3D subsystem.
    Reset,
}

impl Outgoing {
    /// The id of a 3D message.
    pub fn id_3d(&self) -> Option<u8> {
        match self {
            Self::Sensor3d(msg) => msg.get(3).copied(),
            _ => None,
        }
    }
}

/// A message sent by the device.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Reply {
    Sensor3d(Vec<u8>),
    Touch2d(u8, Vec<u8>),

    /// Raw transport input, written as is.
    Raw(Vec<u8>),
}

impl Reply {
    /// A 2D Ack for the instruction `id`.
    pub fn ack(id: OutboundId2d) -> Self {
        Self::Touch2d(0xF0, vec![id.into()])
    }
}

/// Answers every instruction of either subsystem with success.
pub fn acknowledge(out: &Outgoing) -> Vec<Reply> {
    match out {
        Outgoing::Sensor3d(msg) => vec![Reply::Sensor3d(status(msg[3], SystemError::NoError))],
        Outgoing::Touch2d(id, _) => match OutboundId2d::try_from(*id) {
            Ok(OutboundId2d::Update) => vec![Reply::Touch2d(0x55, vec![0])],
            Ok(id @ (OutboundId2d::SetParam | OutboundId2d::GetParam)) => vec![Reply::ack(id)],
            _ => Vec::new(),
        },
        Outgoing::Reset => Vec::new(),
    }
}

type Responder = Box<dyn Fn(&Outgoing) -> Vec<Reply> + Send + Sync>;

/// Decodes outgoing transport data.
enum Decoder {
    Stream(StreamExtractor),
    Packet(PacketExtractor),
}

/// An in-memory transport with a scripted device behind it.
pub struct MockTransport {
    kind: TransportKind,
    open: AtomicBool,
    refuse_open: AtomicBool,
    opened: AtomicUsize,

    incoming_tx: Sender<Vec<u8>>,
    incoming_rx: Receiver<Vec<u8>>,

    /// Stream input not yet returned by a read.
    leftover: Mutex<Vec<u8>>,

    decoder: Mutex<Decoder>,
    writes: Mutex<Vec<Outgoing>>,
    responder: Mutex<Option<Responder>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> Arc<Self> {
        let (incoming_tx, incoming_rx) = flume::unbounded();
        let diagnostics = Arc::new(Diagnostics::new());
        let decoder = match kind {
            TransportKind::Stream => Decoder::Stream(StreamExtractor::new(diagnostics)),
            TransportKind::Packet { report_id } => {
                Decoder::Packet(PacketExtractor::new(report_id, diagnostics))
            },
        };

        Arc::new(Self {
            kind,
            open: AtomicBool::new(false),
            refuse_open: AtomicBool::new(false),
            opened: AtomicUsize::new(0),
            incoming_tx,
            incoming_rx,
            leftover: Mutex::new(Vec::new()),
            decoder: Mutex::new(decoder),
            writes: Mutex::new(Vec::new()),
            responder: Mutex::new(None),
        })
    }

    pub fn stream() -> Arc<Self> {
        Self::new(TransportKind::Stream)
    }

    pub fn packet() -> Arc<Self> {
        Self::new(TransportKind::Packet {
            report_id: packet::DEFAULT_REPORT_ID,
        })
    }

    /// Answers every outgoing message with the replies `responder` returns.
    pub fn respond(&self, responder: impl Fn(&Outgoing) -> Vec<Reply> + Send + Sync + 'static) {
        *lock(&self.responder) = Some(Box::new(responder));
    }

    /// Makes further opens fail.
    pub fn refuse_open(&self, refuse: bool) {
        self.refuse_open.store(refuse, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// How often the transport was opened.
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::Acquire)
    }

    /// Queues a reply as if the device sent it.
    pub fn push(&self, reply: Reply) {
        let report_id = match self.kind {
            TransportKind::Stream => {
                let bytes = match reply {
                    Reply::Sensor3d(msg) => stream::encode(&msg),
                    Reply::Raw(bytes) => bytes,
                    Reply::Touch2d(..) => panic!("stream transports carry no 2D messages"),
                };
                let _ = self.incoming_tx.send(bytes);
                return;
            },
            TransportKind::Packet { report_id } => report_id,
        };

        let packets = match reply {
            Reply::Sensor3d(msg) => packet::encode(report_id, 0xFE, &msg[1..]),
            Reply::Touch2d(id, payload) => packet::encode(report_id, id, &payload),
            Reply::Raw(bytes) => {
                let _ = self.incoming_tx.send(bytes);
                return;
            },
        };
        for packet in packets {
            let _ = self.incoming_tx.send(packet.to_vec());
        }
    }

    pub fn push_3d(&self, msg: Vec<u8>) {
        self.push(Reply::Sensor3d(msg));
    }

    pub fn push_2d(&self, id: u8, payload: Vec<u8>) {
        self.push(Reply::Touch2d(id, payload));
    }

    /// Everything written so far.
    pub fn writes(&self) -> Vec<Outgoing> {
        lock(&self.writes).clone()
    }

    /// The 3D messages written so far with the id `id`.
    pub fn writes_3d(&self, id: u8) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter_map(|out| match out {
                Outgoing::Sensor3d(msg) if msg[3] == id => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn clear_writes(&self) {
        lock(&self.writes).clear();
    }

    fn decode(&self, data: &[u8]) -> Vec<Outgoing> {
        let mut decoder = lock(&self.decoder);
        let mut out = Vec::new();

        match &mut *decoder {
            Decoder::Stream(extractor) => {
                if data == stream::RESET_SEQUENCE {
                    return vec![Outgoing::Reset];
                }
                extractor.feed(data);
                while let Some(msg) = extractor.extract() {
                    out.push(Outgoing::Sensor3d(msg));
                }
            },
            Decoder::Packet(extractor) => {
                extractor.load(data);
                while let Some(msg) = extractor.extract() {
                    out.push(match OutboundId2d::try_from(msg.id) {
                        Ok(OutboundId2d::Subsystem3d) => {
                            let mut rebuilt = vec![(msg.payload.len() + 1) as u8];
                            rebuilt.extend_from_slice(&msg.payload);
                            Outgoing::Sensor3d(rebuilt)
                        },
                        Ok(OutboundId2d::Reset3d) => Outgoing::Reset,
                        _ => Outgoing::Touch2d(msg.id, msg.payload),
                    });
                }
            },
        }
        out
    }
}

impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn open(&self) -> Result<(), TransportError> {
        if self.refuse_open.load(Ordering::Acquire) {
            return Err("device refused to open".into());
        }
        self.open.store(true, Ordering::Release);
        self.opened.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    fn write(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err("write to a closed transport".into());
        }

        for out in self.decode(data) {
            lock(&self.writes).push(out.clone());
            let replies = lock(&self.responder)
                .as_ref()
                .map(|responder| responder(&out))
                .unwrap_or_default();
            for reply in replies {
                self.push(reply);
            }
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError> {
        let mut leftover = lock(&self.leftover);

        if leftover.is_empty() {
            let next = match timeout {
                None => self.incoming_rx.try_recv().ok(),
                Some(timeout) => match self.incoming_rx.recv_timeout(timeout) {
                    Ok(bytes) => Some(bytes),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return Err("device is gone".into()),
                },
            };
            match next {
                Some(bytes) => *leftover = bytes,
                None => return Ok(0),
            }
        }

        let len = match self.kind {
            TransportKind::Stream => leftover.len().min(buf.len()),
            // One packet per read. Anything beyond the buffer is lost.
            TransportKind::Packet { .. } => {
                let len = leftover.len().min(buf.len());
                buf[..len].copy_from_slice(&leftover[..len]);
                leftover.clear();
                return Ok(len);
            },
        };
        buf[..len].copy_from_slice(&leftover[..len]);
        leftover.drain(..len);
        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor3d::data;

    #[test]
    fn frame_layout_follows_mask() {
        let msg = SensorFrame::new(7)
            .dsp_status(1, 2)
            .position(1, 2, 3)
            .electrodes(4)
            .build();
        assert_eq!(msg.len(), data::required_length(data::output_config(&msg)));
        assert_eq!(
            msg,
            [16, 0, 0, 0x91, 0x11, 0x00, 7, 0, 1, 2, 1, 0, 2, 0, 3, 0]
        );
    }

    #[test]
    fn packet_writes_are_decoded() {
        let mock = MockTransport::packet();
        mock.open().unwrap();
        for packet in packet::encode(packet::DEFAULT_REPORT_ID, 0xFD, &[0, 0, 0x06, 1, 2]) {
            mock.write(&packet).unwrap();
        }
        assert_eq!(
            mock.writes(),
            [Outgoing::Sensor3d(vec![6, 0, 0, 0x06, 1, 2])]
        );
    }
}
