//! Polls every configured BMS in turn, forever, and hands the results to a [`Publisher`].

use std::time::Duration;

use log::{info, warn};
use tokio::sync::watch;

use crate::config::DeviceAddress;
use crate::publish::Publisher;
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::transport::BleTransport;

/// Observes a process-wide shutdown request.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Requests shutdown of every [`Shutdown`] created with it.
#[derive(Debug)]
pub struct ShutdownTrigger(watch::Sender<bool>);

impl Shutdown {
    pub fn new() -> (ShutdownTrigger, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger(tx), Shutdown { rx })
    }

    /// A signal that is never triggered.
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    pub async fn triggered(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                // The trigger is gone without firing
                std::future::pending::<()>().await;
            }
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        let _ = self.0.send(true);
    }
}

/// Counts from one pass over the configured devices.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub published: usize,
    pub failed: usize,
}

/// Polls the configured devices one at a time on a fixed interval.
pub struct Poller<T, P> {
    transport: T,
    publisher: P,
    devices: Vec<DeviceAddress>,
    interval: Duration,
    policy: RetryPolicy,
}

impl<T: BleTransport, P: Publisher> Poller<T, P> {
    pub fn new(transport: T, publisher: P, devices: Vec<DeviceAddress>, interval: Duration) -> Self {
        Self {
            transport,
            publisher,
            devices,
            interval,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Poll every device once. A failing device is logged and skipped.
    pub async fn poll_once(&mut self, shutdown: &Shutdown) -> PollSummary {
        let mut summary = PollSummary::default();

        for address in &self.devices {
            if shutdown.is_triggered() {
                break;
            }

            let mut session = Session::new(&mut self.transport, address.clone(), self.policy);
            match session.run(shutdown).await {
                Ok(record) => {
                    if let Some(state) = record.protection_state().filter(|s| !s.is_ok()) {
                        warn!("BMS {address}: protection active: {state}");
                    }
                    match self.publisher.publish(address, &record) {
                        Ok(()) => {
                            info!(
                                "Published data for {address} (SoC: {:?}, current: {:?})",
                                record.state_of_charge(),
                                record.main_current()
                            );
                            summary.published += 1;
                        }
                        Err(err) => {
                            warn!("Failed to publish data for {address}: {err}");
                            summary.failed += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!("Failed to read from {address}: {err}");
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Poll until shutdown is requested, sleeping `interval` between passes.
    pub async fn run(&mut self, mut shutdown: Shutdown) {
        self.set_availability(true);

        loop {
            let summary = self.poll_once(&shutdown).await;
            info!(
                "Polled {} devices: {} published, {} failed",
                self.devices.len(),
                summary.published,
                summary.failed
            );

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.triggered() => break,
            }
        }

        self.set_availability(false);
    }

    fn set_availability(&mut self, online: bool) {
        if let Err(err) = self.publisher.set_availability(online) {
            warn!("Failed to publish availability: {err}");
        }
    }
}

#[tokio::test]
async fn test_shutdown_triggered() {
    let (trigger, mut shutdown) = Shutdown::new();
    let observer = shutdown.clone();
    assert!(!observer.is_triggered());

    trigger.trigger();
    shutdown.triggered().await;
    assert!(observer.is_triggered());
}

#[test]
fn test_shutdown_never() {
    assert!(!Shutdown::never().is_triggered());
}
