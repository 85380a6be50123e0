//! Loopback radio driver: an in-process stand-in for the transceiver.
//!
//! Frames handed to [`LoopbackRadio::send`] are recorded in a log shared by
//! every radio the driver creates, so the host binary and tests can inspect
//! what the node put on the air. Start latency and failures are configurable.
//!
//! Drivers built on the same [`LoopbackAir`] hear each other: a frame is
//! delivered to every other started radio on the same channel and PAN whose
//! address matches the destination (or any, for broadcast).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, trace};

use super::{
    AM_BROADCAST_ADDR, AmAddr, CommsError, CommsLayer, CommsStatus, Eui64, RadioDriver,
    RadioParams, ReceiveHandler, StartCallback,
};

/// A frame put on the air by a loopback radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub source: AmAddr,
    pub destination: AmAddr,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Time between an accepted start request and `Started`. Zero starts
    /// synchronously inside `start`.
    pub start_delay: Duration,
    /// Make `init` fail, as a driver with no transceiver attached would.
    pub fail_init: bool,
    /// Synchronous status `start` returns instead of accepting the request.
    pub reject_start: Option<CommsStatus>,
    /// Accept the start request but never complete it.
    pub stall: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            start_delay: Duration::ZERO,
            fail_init: false,
            reject_start: None,
            stall: false,
        }
    }
}

type FrameLog = Arc<Mutex<Vec<Frame>>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ── Air ───────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Station {
    id: usize,
    params: RadioParams,
    status: Arc<Mutex<CommsStatus>>,
    receiver: Arc<Mutex<Option<ReceiveHandler>>>,
}

impl Station {
    fn hears(&self, from: &Station, destination: AmAddr) -> bool {
        self.id != from.id
            && self.params.channel == from.params.channel
            && self.params.pan_id == from.params.pan_id
            && (destination == AM_BROADCAST_ADDR || destination == self.params.address)
            && *lock(&self.status) == CommsStatus::Started
    }
}

/// Shared medium for loopback radios.
#[derive(Clone, Default)]
pub struct LoopbackAir {
    stations: Arc<Mutex<Vec<Station>>>,
}

impl LoopbackAir {
    pub fn new() -> Self {
        Self::default()
    }

    /// Radios attached so far.
    pub fn stations(&self) -> usize {
        lock(&self.stations).len()
    }

    fn attach(&self, params: RadioParams, status: Arc<Mutex<CommsStatus>>) -> Station {
        let mut stations = lock(&self.stations);
        let station = Station {
            id: stations.len(),
            params,
            status,
            receiver: Arc::new(Mutex::new(None)),
        };
        stations.push(station.clone());
        station
    }

    /// Hand `payload` to every station that hears `from`. Returns the number
    /// of receivers reached. Handlers run after the station list is released.
    fn deliver(&self, from: &Station, destination: AmAddr, payload: &[u8]) -> usize {
        let receivers: Vec<ReceiveHandler> = lock(&self.stations)
            .iter()
            .filter(|s| s.hears(from, destination))
            .filter_map(|s| lock(&s.receiver).clone())
            .collect();
        for receiver in &receivers {
            receiver(from.params.address, payload);
        }
        receivers.len()
    }
}

// ── Driver ────────────────────────────────────────────────────────────────────

pub struct LoopbackDriver {
    config: LoopbackConfig,
    air: LoopbackAir,
    frames: FrameLog,
    init_calls: AtomicUsize,
}

impl LoopbackDriver {
    /// A driver alone on its own air.
    pub fn new(config: LoopbackConfig) -> Self {
        Self::on_air(config, LoopbackAir::new())
    }

    /// A driver whose radios share `air` with other drivers.
    pub fn on_air(config: LoopbackConfig, air: LoopbackAir) -> Self {
        Self {
            config,
            air,
            frames: Arc::new(Mutex::new(Vec::new())),
            init_calls: AtomicUsize::new(0),
        }
    }

    /// Snapshot of every frame sent so far.
    pub fn frames(&self) -> Vec<Frame> {
        lock(&self.frames).clone()
    }

    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::Relaxed)
    }
}

impl RadioDriver for LoopbackDriver {
    fn init(&self, params: RadioParams) -> Result<Arc<dyn CommsLayer>, CommsError> {
        self.init_calls.fetch_add(1, Ordering::Relaxed);
        if self.config.fail_init {
            return Err(CommsError::Driver("no transceiver on loopback bus".into()));
        }
        debug!(
            channel = params.channel,
            pan_id = format_args!("{:04X}", params.pan_id),
            address = format_args!("{:04X}", params.address),
            "loopback radio initialised"
        );
        let status = Arc::new(Mutex::new(CommsStatus::Stopped));
        let station = self.air.attach(params, status.clone());
        Ok(Arc::new(LoopbackRadio {
            params,
            config: self.config.clone(),
            eui: Mutex::new(Eui64::default()),
            status,
            frames: self.frames.clone(),
            air: self.air.clone(),
            station,
            polls: AtomicU64::new(0),
        }))
    }
}

// ── Radio ─────────────────────────────────────────────────────────────────────

pub struct LoopbackRadio {
    params: RadioParams,
    config: LoopbackConfig,
    eui: Mutex<Eui64>,
    status: Arc<Mutex<CommsStatus>>,
    frames: FrameLog,
    air: LoopbackAir,
    station: Station,
    polls: AtomicU64,
}

impl LoopbackRadio {
    pub fn params(&self) -> RadioParams {
        self.params
    }

    /// Number of `status` calls so far.
    pub fn status_polls(&self) -> u64 {
        self.polls.load(Ordering::Relaxed)
    }
}

impl CommsLayer for LoopbackRadio {
    fn name(&self) -> &str {
        "radio"
    }

    fn address(&self) -> AmAddr {
        self.params.address
    }

    fn eui(&self) -> Eui64 {
        *lock(&self.eui)
    }

    fn set_eui(&self, eui: Eui64) {
        *lock(&self.eui) = eui;
    }

    fn start(&self, on_started: StartCallback) -> CommsStatus {
        if let Some(status) = self.config.reject_start {
            return status;
        }
        {
            let mut status = lock(&self.status);
            if matches!(*status, CommsStatus::Starting | CommsStatus::Started) {
                return CommsStatus::Busy;
            }
            *status = CommsStatus::Starting;
        }
        if self.config.stall {
            return CommsStatus::Success;
        }

        if self.config.start_delay.is_zero() {
            *lock(&self.status) = CommsStatus::Started;
            on_started(CommsStatus::Started);
            return CommsStatus::Success;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            *lock(&self.status) = CommsStatus::Stopped;
            return CommsStatus::Fail;
        };
        let status = self.status.clone();
        let delay = self.config.start_delay;
        runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            *lock(&status) = CommsStatus::Started;
            on_started(CommsStatus::Started);
        });
        CommsStatus::Success
    }

    fn status(&self) -> CommsStatus {
        self.polls.fetch_add(1, Ordering::Relaxed);
        *lock(&self.status)
    }

    fn send(&self, destination: AmAddr, payload: &[u8]) -> Result<(), CommsError> {
        let status = *lock(&self.status);
        if status != CommsStatus::Started {
            return Err(CommsError::NotStarted(status));
        }
        lock(&self.frames).push(Frame {
            source: self.params.address,
            destination,
            payload: payload.to_vec(),
        });
        let heard = self.air.deliver(&self.station, destination, payload);
        trace!(destination = format_args!("{destination:04X}"), len = payload.len(), heard, "tx");
        Ok(())
    }

    fn set_receiver(&self, handler: ReceiveHandler) {
        *lock(&self.station.receiver) = Some(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> RadioParams {
        RadioParams { channel: 11, pan_id: 0x22, address: 0x0042 }
    }

    type Heard = Arc<Mutex<Vec<(AmAddr, Vec<u8>)>>>;

    fn listening(driver: &LoopbackDriver, params: RadioParams) -> (Arc<dyn CommsLayer>, Heard) {
        let radio = driver.init(params).unwrap();
        let heard: Heard = Arc::default();
        let sink = heard.clone();
        radio.set_receiver(Arc::new(move |src: AmAddr, payload: &[u8]| {
            sink.lock().unwrap().push((src, payload.to_vec()));
        }));
        radio.start(Box::new(|_| {}));
        (radio, heard)
    }

    #[test]
    fn fail_init_reports_driver_error() {
        let driver = LoopbackDriver::new(LoopbackConfig { fail_init: true, ..Default::default() });
        assert!(matches!(driver.init(params()), Err(CommsError::Driver(_))));
        assert_eq!(driver.init_calls(), 1);
    }

    #[test]
    fn zero_delay_starts_synchronously() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let radio = driver.init(params()).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let status = radio.start(Box::new(move |s| tx.send(s).unwrap()));
        assert_eq!(status, CommsStatus::Success);
        assert_eq!(radio.status(), CommsStatus::Started);
        assert_eq!(rx.recv().unwrap(), CommsStatus::Started);
    }

    #[test]
    fn second_start_is_busy() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let radio = driver.init(params()).unwrap();
        radio.start(Box::new(|_| {}));
        assert_eq!(radio.start(Box::new(|_| {})), CommsStatus::Busy);
    }

    #[test]
    fn delayed_start_without_runtime_fails() {
        let driver = LoopbackDriver::new(LoopbackConfig {
            start_delay: Duration::from_millis(5),
            ..Default::default()
        });
        let radio = driver.init(params()).unwrap();
        assert_eq!(radio.start(Box::new(|_| {})), CommsStatus::Fail);
        assert_eq!(radio.status(), CommsStatus::Stopped);
    }

    #[tokio::test]
    async fn delayed_start_completes_after_delay() {
        tokio::time::pause();
        let driver = LoopbackDriver::new(LoopbackConfig {
            start_delay: Duration::from_millis(20),
            ..Default::default()
        });
        let radio = driver.init(params()).unwrap();
        assert_eq!(radio.start(Box::new(|_| {})), CommsStatus::Success);
        assert_eq!(radio.status(), CommsStatus::Starting);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(radio.status(), CommsStatus::Started);
    }

    #[test]
    fn send_requires_started_and_records_frames() {
        let driver = LoopbackDriver::new(LoopbackConfig::default());
        let radio = driver.init(params()).unwrap();
        assert!(matches!(
            radio.send(AM_BROADCAST_ADDR, b"x"),
            Err(CommsError::NotStarted(CommsStatus::Stopped))
        ));
        radio.start(Box::new(|_| {}));
        radio.send(AM_BROADCAST_ADDR, b"hello").unwrap();
        let frames = driver.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].source, 0x0042);
        assert_eq!(frames[0].destination, AM_BROADCAST_ADDR);
        assert_eq!(frames[0].payload, b"hello");
    }

    #[test]
    fn broadcast_reaches_other_radios_on_the_air() {
        let air = LoopbackAir::new();
        let a = LoopbackDriver::on_air(LoopbackConfig::default(), air.clone());
        let b = LoopbackDriver::on_air(LoopbackConfig::default(), air.clone());
        let (tx, own) = listening(&a, params());
        let (_rx, heard) = listening(&b, RadioParams { address: 0x0007, ..params() });

        tx.send(AM_BROADCAST_ADDR, b"hi").unwrap();

        assert_eq!(air.stations(), 2);
        assert_eq!(*heard.lock().unwrap(), vec![(0x0042, b"hi".to_vec())]);
        assert!(own.lock().unwrap().is_empty());
        assert!(b.frames().is_empty());
    }

    #[test]
    fn unicast_only_reaches_its_destination() {
        let air = LoopbackAir::new();
        let driver = LoopbackDriver::on_air(LoopbackConfig::default(), air);
        let (tx, _) = listening(&driver, params());
        let (_b, to_b) = listening(&driver, RadioParams { address: 0x0007, ..params() });
        let (_c, to_c) = listening(&driver, RadioParams { address: 0x0008, ..params() });

        tx.send(0x0008, b"x").unwrap();

        assert!(to_b.lock().unwrap().is_empty());
        assert_eq!(to_c.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_channel_and_stopped_radios_hear_nothing() {
        let air = LoopbackAir::new();
        let driver = LoopbackDriver::on_air(LoopbackConfig::default(), air);
        let (tx, _) = listening(&driver, params());
        let far_params = RadioParams { channel: 12, address: 0x0007, ..params() };
        let (_far, far) = listening(&driver, far_params);
        let idle = driver.init(RadioParams { address: 0x0009, ..params() }).unwrap();
        let idle_heard: Heard = Arc::default();
        let sink = idle_heard.clone();
        idle.set_receiver(Arc::new(move |src: AmAddr, p: &[u8]| {
            sink.lock().unwrap().push((src, p.to_vec()));
        }));

        tx.send(AM_BROADCAST_ADDR, b"x").unwrap();

        assert!(far.lock().unwrap().is_empty());
        assert!(idle_heard.lock().unwrap().is_empty());
    }
}
