//! Resource watchdog
//!
//! A [`ResourceSignal`] watches some free-resource measure and emits a single
//! [`LowResourceEvent`] once it drops under the configured threshold. The
//! session turns that event into a session-wide abort which jobs observe
//! through an [`AbortSignal`] between atomic steps.

use crate::error::{Result, UploaderError};
use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sysinfo::System;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Polling settings handed to a signal when the session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogSettings {
    pub poll_interval: Duration,
    pub low_threshold_bytes: u64,
}

/// Emitted when the watched resource falls under the threshold
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LowResourceEvent {
    pub available_bytes: u64,
    pub threshold_bytes: u64,
    pub at: DateTime<Utc>,
}

impl LowResourceEvent {
    pub fn new(available_bytes: u64, threshold_bytes: u64) -> Self {
        Self {
            available_bytes,
            threshold_bytes,
            at: Utc::now(),
        }
    }
}

/// Source of low-resource events
///
/// `stop` must be safe to call more than once and before `start`.
pub trait ResourceSignal: Send {
    /// Begin watching; the receiver yields at most one event per start
    fn start(&mut self, settings: WatchdogSettings) -> Result<mpsc::Receiver<LowResourceEvent>>;

    /// Stop watching and drop any pending timer
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Cooperative session-wide abort flag observed by jobs
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the abort has been raised
    pub async fn raised(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }
}

/// Owning side of an [`AbortSignal`]
#[derive(Debug)]
pub(crate) struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub(crate) fn raise(&self) {
        self.tx.send_replace(true);
    }
}

type Probe = Arc<dyn Fn() -> u64 + Send + Sync>;

/// Signal that samples a probe on a fixed interval
pub struct PollingSignal {
    name: String,
    probe: Probe,
    task: Option<JoinHandle<()>>,
}

impl PollingSignal {
    /// Watch an arbitrary measure, in bytes, returned by `probe`
    pub fn new<F>(name: impl Into<String>, probe: F) -> Self
    where
        F: Fn() -> u64 + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            probe: Arc::new(probe),
            task: None,
        }
    }

    /// Watch the host's available memory
    pub fn free_memory() -> Self {
        let system = Mutex::new(System::new());
        Self::new("freemem", move || {
            let mut system = system.lock().unwrap_or_else(|p| p.into_inner());
            system.refresh_memory();
            system.available_memory()
        })
    }
}

impl std::fmt::Debug for PollingSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingSignal")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

impl ResourceSignal for PollingSignal {
    fn start(&mut self, settings: WatchdogSettings) -> Result<mpsc::Receiver<LowResourceEvent>> {
        if self.task.is_some() {
            return Err(UploaderError::config_error(
                "watchdog",
                format!("{} signal is already running", self.name),
            ));
        }
        if settings.poll_interval.is_zero() {
            return Err(UploaderError::config_error(
                "memory-poll-interval-ms",
                "Poll interval must be greater than 0",
            ));
        }

        let (tx, rx) = mpsc::channel(1);
        let probe = self.probe.clone();
        let name = self.name.clone();

        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(settings.poll_interval);
            loop {
                ticker.tick().await;
                let available = probe();
                if available < settings.low_threshold_bytes {
                    warn!(
                        "{} below threshold: {} available, {} required",
                        name,
                        bytesize::ByteSize::b(available),
                        bytesize::ByteSize::b(settings.low_threshold_bytes)
                    );
                    let _ = tx
                        .send(LowResourceEvent::new(
                            available,
                            settings.low_threshold_bytes,
                        ))
                        .await;
                    return;
                }
            }
        }));

        debug!(
            "{} watchdog started ({:?} interval)",
            self.name, settings.poll_interval
        );
        Ok(rx)
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("{} watchdog stopped", self.name);
        }
    }

    fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for PollingSignal {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Debug, Default)]
struct ManualState {
    sender: Option<mpsc::Sender<LowResourceEvent>>,
    threshold_bytes: u64,
    starts: usize,
    stops: usize,
}

/// Signal fired by hand through its [`SignalTrigger`]
///
/// Useful for hosts that already run their own health checks.
#[derive(Debug, Clone, Default)]
pub struct ManualSignal {
    state: Arc<Mutex<ManualState>>,
}

/// Fires the paired [`ManualSignal`]
#[derive(Debug, Clone)]
pub struct SignalTrigger {
    state: Arc<Mutex<ManualState>>,
}

impl ManualSignal {
    pub fn new() -> (Self, SignalTrigger) {
        let signal = Self::default();
        let trigger = SignalTrigger {
            state: signal.state.clone(),
        };
        (signal, trigger)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl ResourceSignal for ManualSignal {
    fn start(&mut self, settings: WatchdogSettings) -> Result<mpsc::Receiver<LowResourceEvent>> {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.lock();
        state.sender = Some(tx);
        state.threshold_bytes = settings.low_threshold_bytes;
        state.starts += 1;
        Ok(rx)
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        state.sender = None;
        state.stops += 1;
    }

    fn is_running(&self) -> bool {
        self.lock().sender.is_some()
    }
}

impl SignalTrigger {
    /// Report `available_bytes` as the current free amount
    ///
    /// Returns false when the signal is not running.
    pub fn fire(&self, available_bytes: u64) -> bool {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match &state.sender {
            Some(sender) => sender
                .try_send(LowResourceEvent::new(available_bytes, state.threshold_bytes))
                .is_ok(),
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .sender
            .is_some()
    }

    /// How many times the signal was stopped
    pub fn stop_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).stops
    }

    pub fn start_count(&self) -> usize {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).starts
    }
}
