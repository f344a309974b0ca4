//! One polling cycle against one BMS: connect, issue the three requests, disconnect.
//!
//! The link is unreliable. Connection attempts and each request are retried a bounded number
//! of times with a short deadline per attempt. A connection that cannot be established fails
//! the cycle, a request that never gets a reply only leaves its part of the record empty.
//!
//! Every call into the transport is bounded by the attempt deadline here, so a stalled GATT
//! operation costs one attempt and never the whole poll loop.

use std::time::Duration;

use futures_util::FutureExt;
use log::{debug, warn};
use tokio::time::timeout;

use crate::config::DeviceAddress;
use crate::error::{CycleError, RetryError, TransportError};
use crate::message::{Command, ExchangeSpec, RawExchange, EXCHANGES};
use crate::retry::RetryPolicy;
use crate::scheduler::Shutdown;
use crate::telemetry::TelemetryRecord;
use crate::transport::{BleLink, BleTransport, BMS_WRITE_CHARACTERISTIC_ID};

/// Where a [`Session`] is in its polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Exchanging(Command),
    Closing,
    Done,
    /// No connection could be established.
    Failed,
}

/// A single polling cycle. Holds the transport exclusively until it is dropped.
pub struct Session<'t, T: BleTransport + ?Sized> {
    transport: &'t mut T,
    address: DeviceAddress,
    policy: RetryPolicy,
    state: SessionState,
    link: Option<Box<dyn BleLink>>,
}

impl<'t, T: BleTransport + ?Sized> Session<'t, T> {
    pub fn new(transport: &'t mut T, address: DeviceAddress, policy: RetryPolicy) -> Self {
        Self {
            transport,
            address,
            policy,
            state: SessionState::Idle,
            link: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn address(&self) -> &DeviceAddress {
        &self.address
    }

    /// Run the cycle and return whatever telemetry could be decoded.
    ///
    /// The link is closed before this returns, whatever the outcome.
    pub async fn run(&mut self, shutdown: &Shutdown) -> Result<TelemetryRecord, CycleError> {
        self.connect(shutdown).await?;

        let mut record = TelemetryRecord::default();
        let mut cancelled = false;
        for spec in EXCHANGES.iter() {
            self.state = SessionState::Exchanging(spec.command);
            let Some(raw) = self.exchange(spec, shutdown).await else {
                cancelled = true;
                break;
            };

            match raw.decode() {
                Ok(frame) => record.apply(frame),
                Err(err) => warn!("BMS {}: {} frame rejected: {err}", self.address, raw.command),
            }
        }

        self.close().await;

        if cancelled {
            return Err(CycleError::Cancelled {
                address: self.address.clone(),
            });
        }
        if record.is_empty() {
            return Err(CycleError::EmptyRecord {
                address: self.address.clone(),
            });
        }
        Ok(record)
    }

    async fn connect(&mut self, shutdown: &Shutdown) -> Result<(), CycleError> {
        self.state = SessionState::Connecting;

        let policy = self.policy;
        let deadline = policy.attempt_timeout;
        let address = self.address.clone();
        let result = policy
            .run("connect", &mut *self.transport, shutdown, move |transport, attempt| {
                let address = address.clone();
                async move {
                    debug!("BMS {address}: connecting (try: {attempt})");
                    bounded(deadline, "connection", transport.open(&address, deadline)).await
                }
                .boxed()
            })
            .await;

        match result {
            Ok(link) => {
                debug!("BMS {}: connection successful", self.address);
                self.link = Some(link);
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                self.state = SessionState::Failed;
                if let Some(err) = last {
                    debug!("BMS {}: last connection error: {err}", self.address);
                }
                Err(CycleError::ConnectTimeout {
                    address: self.address.clone(),
                    attempts,
                })
            }
            Err(RetryError::Cancelled) => {
                self.state = SessionState::Failed;
                Err(CycleError::Cancelled {
                    address: self.address.clone(),
                })
            }
        }
    }

    /// Send one request and collect its reply. `None` when shutdown interrupted the exchange.
    async fn exchange(
        &mut self,
        spec: &'static ExchangeSpec,
        shutdown: &Shutdown,
    ) -> Option<RawExchange> {
        let policy = self.policy;
        let deadline = policy.attempt_timeout;
        let link = match self.link.as_deref_mut() {
            Some(link) => link,
            None => return Some(RawExchange::new(spec.command, Vec::new())),
        };

        let result = policy
            .run(spec.command.label(), link, shutdown, move |link, _| {
                exchange_once(link, spec, deadline).boxed()
            })
            .await;

        match result {
            Ok(bytes) => Some(RawExchange::new(spec.command, bytes)),
            Err(RetryError::Exhausted { attempts, last }) => {
                let reason = last.map(|err| err.to_string()).unwrap_or_default();
                warn!(
                    "BMS {}: no reply to {} request after {attempts} attempts: {reason}",
                    self.address, spec.command
                );
                Some(RawExchange::new(spec.command, Vec::new()))
            }
            Err(RetryError::Cancelled) => None,
        }
    }

    async fn close(&mut self) {
        self.state = SessionState::Closing;
        if let Some(mut link) = self.link.take() {
            if timeout(self.policy.attempt_timeout, link.close()).await.is_err() {
                warn!("BMS {}: disconnect did not complete in time", self.address);
            }
        }
        self.state = SessionState::Done;
    }
}

impl<T: BleTransport + ?Sized> Drop for Session<'_, T> {
    fn drop(&mut self) {
        if self.link.is_some() {
            warn!("BMS {}: session dropped before its link was closed", self.address);
        }
    }
}

/// Write the request and read as many notification events as the reply spans.
async fn exchange_once<L: BleLink + ?Sized>(
    link: &mut L,
    spec: &ExchangeSpec,
    deadline: Duration,
) -> Result<Vec<u8>, TransportError> {
    bounded(
        deadline,
        "write",
        link.write_characteristic(BMS_WRITE_CHARACTERISTIC_ID, &spec.request),
    )
    .await?;

    let mut buffer = Vec::new();
    for _ in 0..spec.notifications {
        buffer.extend(bounded(deadline, "notification", link.await_notification(deadline)).await?);
    }
    Ok(buffer)
}

/// Give up on `operation` once `deadline` has passed.
async fn bounded<T, F>(
    deadline: Duration,
    what: &'static str,
    operation: F,
) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    timeout(deadline, operation)
        .await
        .unwrap_or(Err(TransportError::Timeout(what)))
}
