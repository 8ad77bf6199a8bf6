//! In-memory collaborators for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::identity::AddressLookup;
use crate::rotation::Reporter;
use crate::service::{ServiceController, ServiceError};

/// Service double that counts calls.
#[derive(Default)]
pub struct FakeService {
    running: bool,
    fail_start: bool,
    fail_reload: bool,
    hang_reload: bool,
    fail_stop: bool,
    hang_stop: bool,
    stop_delay: Duration,
    starts: AtomicUsize,
    stops: AtomicUsize,
    reloads: AtomicUsize,
}

impl FakeService {
    pub fn running() -> Self {
        Self {
            running: true,
            ..Default::default()
        }
    }

    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// `reload()` never returns.
    pub fn hanging_reload(mut self) -> Self {
        self.hang_reload = true;
        self
    }

    /// `stop()` never returns.
    pub fn hanging_stop(mut self) -> Self {
        self.hang_stop = true;
        self
    }

    pub fn failing_reload(mut self) -> Self {
        self.fail_reload = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = delay;
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reloads(&self) -> usize {
        self.reloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceController for FakeService {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn start(&self) -> Result<(), ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ServiceError::Unsupported("starting tor"));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ServiceError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.hang_stop {
            std::future::pending::<()>().await;
        }
        if !self.stop_delay.is_zero() {
            tokio::time::sleep(self.stop_delay).await;
        }
        if self.fail_stop {
            return Err(ServiceError::ProcessNotFound);
        }
        Ok(())
    }

    async fn reload(&self) -> Result<(), ServiceError> {
        self.reloads.fetch_add(1, Ordering::SeqCst);
        if self.hang_reload {
            std::future::pending::<()>().await;
        }
        if self.fail_reload {
            return Err(ServiceError::ProcessNotFound);
        }
        Ok(())
    }

    async fn is_running(&self) -> bool {
        self.running
    }
}

/// Lookup that replays scripted answers, then repeats the last one.
pub struct ScriptedLookup {
    answers: Mutex<VecDeque<Option<String>>>,
    last: Mutex<Option<String>>,
    calls: Mutex<Vec<bool>>,
}

impl ScriptedLookup {
    pub fn new<'a>(answers: impl IntoIterator<Item = Option<&'a str>>) -> Self {
        Self {
            answers: Mutex::new(
                answers
                    .into_iter()
                    .map(|a| a.map(str::to_string))
                    .collect(),
            ),
            last: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `via_proxy` flag of every lookup so far.
    pub fn calls(&self) -> Vec<bool> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AddressLookup for ScriptedLookup {
    async fn lookup(&self, via_proxy: bool) -> Option<String> {
        self.calls.lock().unwrap().push(via_proxy);
        let mut last = self.last.lock().unwrap();
        if let Some(next) = self.answers.lock().unwrap().pop_front() {
            *last = next;
        }
        last.clone()
    }
}

/// Reporter that records every reported address.
#[derive(Default)]
pub struct RecordingReporter {
    reports: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn reports(&self) -> Vec<String> {
        self.reports.lock().unwrap().clone()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, address: &str) {
        self.reports.lock().unwrap().push(address.to_string());
    }
}
