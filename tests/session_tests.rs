//! Polling cycles against scripted devices.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;
use bmsread::message::{Command, ExchangeSpec};
use bmsread::transport::mock::{MockDevice, MockTransport};
use bmsread::{
    BleLink, BleTransport, CycleError, DeviceAddress, ProtectionState, RetryPolicy, Session,
    SessionState, Shutdown, ShutdownTrigger, TransportError,
};

const STATUS_PART_1: &str = "dd03001b052800001bb22aef0002290a00000000";
const STATUS_PART_2: &str = "000025410304020b740b6bfc3977";
const CELLS: &str = "dd0400080ce50ce30ce50ce8fc3377";

fn address() -> DeviceAddress {
    "A4:C1:38:00:11:22".parse().unwrap()
}

fn request(command: Command) -> &'static [u8] {
    &ExchangeSpec::for_command(command).request
}

fn name_reply() -> Vec<u8> {
    let mut reply = hex::decode("dd05000a").unwrap();
    reply.extend_from_slice(b"LT-12V100A");
    reply.extend_from_slice(&[0xfc, 0x1e, 0x77]);
    reply
}

fn healthy_device() -> MockDevice {
    MockDevice::new()
        .reply(
            request(Command::Status),
            &[
                &hex::decode(STATUS_PART_1).unwrap(),
                &hex::decode(STATUS_PART_2).unwrap(),
            ],
        )
        .reply(request(Command::Cells), &[&hex::decode(CELLS).unwrap()])
        .reply(request(Command::Name), &[&name_reply()])
}

fn writes_of(transport: &MockTransport, command: Command) -> usize {
    transport
        .stats()
        .writes
        .iter()
        .filter(|w| w.as_slice() == request(command))
        .count()
}

#[tokio::test]
async fn test_full_cycle() {
    let mut transport = MockTransport::new().with_device(address(), healthy_device());

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.address(), &address());
    let record = session.run(&Shutdown::never()).await.unwrap();
    assert_eq!(session.state(), SessionState::Done);
    drop(session);

    assert_eq!(record.main_voltage(), Some(13.2));
    assert_eq!(record.main_current(), Some(0.0));
    assert_eq!(record.state_of_charge(), Some(0x41));
    assert!(record.protection_state().is_some_and(ProtectionState::is_ok));

    let status = record.status.as_ref().unwrap();
    assert_eq!(status.main_voltage, 13.2);
    assert_eq!(status.state_of_charge, 0x41);
    assert_eq!(status.cycle_count, 2);
    assert_eq!(status.protection_state, ProtectionState::Ok);
    assert_eq!(status.temperature1, 20.1);
    assert_eq!(record.cell_voltages, Some(vec![3.301, 3.299, 3.301, 3.304]));
    assert_eq!(record.name.as_deref(), Some("LT-12V100A"));

    let stats = transport.stats();
    assert_eq!(stats.open_attempts, 1);
    assert_eq!(stats.closes, 1);
    assert_eq!(stats.open_now, 0);
    assert_eq!(
        stats.writes,
        vec![
            request(Command::Status).to_vec(),
            request(Command::Cells).to_vec(),
            request(Command::Name).to_vec(),
        ]
    );
}

#[tokio::test]
async fn test_connect_gives_up_after_ten_attempts() {
    let mut transport = MockTransport::new().with_device(address(), MockDevice::unreachable());

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    let result = session.run(&Shutdown::never()).await;
    assert!(matches!(
        result,
        Err(CycleError::ConnectTimeout { attempts: 10, .. })
    ));
    assert_eq!(session.state(), SessionState::Failed);
    drop(session);

    let stats = transport.stats();
    assert_eq!(stats.open_attempts, 10);
    assert_eq!(stats.opened, 0);
    assert_eq!(stats.closes, 0);
    assert!(stats.writes.is_empty());
}

#[tokio::test]
async fn test_connect_retries_until_success() {
    let mut transport =
        MockTransport::new().with_device(address(), healthy_device().fail_connects(3));

    let record = Session::new(&mut transport, address(), RetryPolicy::default())
        .run(&Shutdown::never())
        .await
        .unwrap();
    assert!(record.status.is_some());

    let stats = transport.stats();
    assert_eq!(stats.open_attempts, 4);
    assert_eq!(stats.closes, 1);
}

#[tokio::test]
async fn test_missing_second_notification_degrades_status_only() {
    let device = healthy_device().reply(
        request(Command::Status),
        &[&hex::decode(STATUS_PART_1).unwrap()],
    );
    let mut transport = MockTransport::new().with_device(address(), device);

    let record = Session::new(&mut transport, address(), RetryPolicy::default())
        .run(&Shutdown::never())
        .await
        .unwrap();
    assert_eq!(record.status, None);
    assert_eq!(record.cell_voltages.as_ref().map(Vec::len), Some(4));
    assert!(record.name.is_some());

    assert_eq!(writes_of(&transport, Command::Status), 10);
    assert_eq!(writes_of(&transport, Command::Cells), 1);
    assert_eq!(transport.stats().closes, 1);
}

#[tokio::test]
async fn test_dropped_replies_are_retried() {
    let device = healthy_device().drop_replies(request(Command::Cells), 2);
    let mut transport = MockTransport::new().with_device(address(), device);

    let record = Session::new(&mut transport, address(), RetryPolicy::default())
        .run(&Shutdown::never())
        .await
        .unwrap();
    assert_eq!(record.cell_voltages.as_ref().map(Vec::len), Some(4));
    assert_eq!(writes_of(&transport, Command::Cells), 3);
}

#[tokio::test]
async fn test_rejected_frames_leave_fields_absent() {
    // Replies to status arrive with the cells header, cells is unterminated
    let device = MockDevice::new()
        .reply(request(Command::Status), &[&hex::decode(CELLS).unwrap(), &[]])
        .reply(request(Command::Cells), &[&hex::decode("dd0400080ce50ce3").unwrap()])
        .reply(request(Command::Name), &[&name_reply()]);
    let mut transport = MockTransport::new().with_device(address(), device);

    let record = Session::new(&mut transport, address(), RetryPolicy::default())
        .run(&Shutdown::never())
        .await
        .unwrap();
    assert_eq!(record.status, None);
    assert_eq!(record.cell_voltages, None);
    assert_eq!(record.name.as_deref(), Some("LT-12V100A"));
}

#[tokio::test]
async fn test_silent_device_is_an_empty_record() {
    let mut transport = MockTransport::new().with_device(address(), MockDevice::new());

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    let result = session.run(&Shutdown::never()).await;
    assert!(matches!(result, Err(CycleError::EmptyRecord { .. })));
    assert_eq!(session.state(), SessionState::Done);
    drop(session);

    let stats = transport.stats();
    assert_eq!(stats.writes.len(), 30);
    assert_eq!(stats.closes, 1);
}

#[tokio::test]
async fn test_shutdown_before_connect() {
    let mut transport = MockTransport::new().with_device(address(), healthy_device());
    let (trigger, shutdown) = Shutdown::new();
    trigger.trigger();

    let result = Session::new(&mut transport, address(), RetryPolicy::default())
        .run(&shutdown)
        .await;
    assert!(matches!(result, Err(CycleError::Cancelled { .. })));
    assert_eq!(transport.stats().open_attempts, 0);
}

#[tokio::test]
async fn test_custom_retry_bound() {
    let mut transport = MockTransport::new().with_device(address(), MockDevice::unreachable());
    let policy = RetryPolicy {
        max_attempts: 3,
        ..RetryPolicy::default()
    };

    let result = Session::new(&mut transport, address(), policy)
        .run(&Shutdown::never())
        .await;
    assert!(matches!(
        result,
        Err(CycleError::ConnectTimeout { attempts: 3, .. })
    ));
    assert_eq!(transport.stats().open_attempts, 3);
}

/// Counts calls into a device whose GATT operations never complete.
#[derive(Debug, Default)]
struct StallCounters {
    opens: AtomicU32,
    writes: AtomicU32,
    closes: AtomicU32,
}

/// Connects at once when `link_stalls`, otherwise never finishes connecting.
struct StalledTransport {
    counters: Arc<StallCounters>,
    link_stalls: bool,
}

struct StalledLink {
    counters: Arc<StallCounters>,
}

#[async_trait]
impl BleTransport for StalledTransport {
    async fn open(
        &mut self,
        _address: &DeviceAddress,
        _deadline: Duration,
    ) -> Result<Box<dyn BleLink>, TransportError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        if !self.link_stalls {
            std::future::pending::<()>().await;
        }
        Ok(Box::new(StalledLink {
            counters: Arc::clone(&self.counters),
        }))
    }
}

#[async_trait]
impl BleLink for StalledLink {
    async fn write_characteristic(
        &mut self,
        _characteristic: Uuid,
        _bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.counters.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn await_notification(&mut self, _deadline: Duration) -> Result<Vec<u8>, TransportError> {
        std::future::pending().await
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        std::future::pending::<()>().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_stalled_connect_is_bounded() {
    let counters = Arc::new(StallCounters::default());
    let mut transport = StalledTransport {
        counters: Arc::clone(&counters),
        link_stalls: false,
    };

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    let result = session.run(&Shutdown::never()).await;
    assert!(matches!(
        result,
        Err(CycleError::ConnectTimeout { attempts: 10, .. })
    ));
    assert_eq!(session.state(), SessionState::Failed);
    drop(session);

    assert_eq!(counters.opens.load(Ordering::SeqCst), 10);
    assert_eq!(counters.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_notifications_and_close_are_bounded() {
    let counters = Arc::new(StallCounters::default());
    let mut transport = StalledTransport {
        counters: Arc::clone(&counters),
        link_stalls: true,
    };

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    let result = session.run(&Shutdown::never()).await;
    assert!(matches!(result, Err(CycleError::EmptyRecord { .. })));
    assert_eq!(session.state(), SessionState::Done);
    drop(session);

    assert_eq!(counters.opens.load(Ordering::SeqCst), 1);
    assert_eq!(counters.writes.load(Ordering::SeqCst), 30);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

/// Requests shutdown as soon as the first request has been written.
struct ShutdownOnWrite {
    inner: MockTransport,
    trigger: Option<ShutdownTrigger>,
}

struct ShutdownOnWriteLink {
    inner: Box<dyn BleLink>,
    trigger: Option<ShutdownTrigger>,
}

#[async_trait]
impl BleTransport for ShutdownOnWrite {
    async fn open(
        &mut self,
        address: &DeviceAddress,
        deadline: Duration,
    ) -> Result<Box<dyn BleLink>, TransportError> {
        let inner = self.inner.open(address, deadline).await?;
        Ok(Box::new(ShutdownOnWriteLink {
            inner,
            trigger: self.trigger.take(),
        }))
    }
}

#[async_trait]
impl BleLink for ShutdownOnWriteLink {
    async fn write_characteristic(
        &mut self,
        characteristic: Uuid,
        bytes: &[u8],
    ) -> Result<(), TransportError> {
        self.inner.write_characteristic(characteristic, bytes).await?;
        if let Some(trigger) = self.trigger.take() {
            trigger.trigger();
        }
        Ok(())
    }

    async fn await_notification(&mut self, deadline: Duration) -> Result<Vec<u8>, TransportError> {
        self.inner.await_notification(deadline).await
    }

    async fn close(&mut self) {
        self.inner.close().await;
    }
}

#[tokio::test]
async fn test_shutdown_during_exchange_still_closes() {
    let device = healthy_device().drop_replies(request(Command::Status), 1);
    let mock = MockTransport::new().with_device(address(), device);
    let (trigger, shutdown) = Shutdown::new();
    let mut transport = ShutdownOnWrite {
        inner: mock.clone(),
        trigger: Some(trigger),
    };

    let mut session = Session::new(&mut transport, address(), RetryPolicy::default());
    let result = session.run(&shutdown).await;
    assert!(matches!(result, Err(CycleError::Cancelled { .. })));
    assert_eq!(session.state(), SessionState::Done);
    drop(session);

    let stats = mock.stats();
    assert_eq!(stats.opened, 1);
    assert_eq!(stats.closes, 1);
    assert_eq!(stats.open_now, 0);
    assert_eq!(stats.writes, vec![request(Command::Status).to_vec()]);
}
