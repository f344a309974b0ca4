//! Poll LiFePO4 Battery Management Systems over Bluetooth Low Energy and republish their telemetry
//!
//! Tested with Liontron batteries, whose BMS speaks the common `0xDD ... 0x77` framed protocol
//! over a GATT service with one write and one notify characteristic.
//!
//! Every polling cycle issues three requests to each configured BMS and decodes the replies:
//!
//! - Pack voltage (V), current (A), remaining and nominal capacity (Ah)
//! - Cycles (count)
//! - State of charge (%)
//! - Protection flags and the dominant protection state
//! - Two temperatures (°C)
//! - Cell voltages (V)
//! - The name of the BMS
//!
//! The radio link drops notifications routinely, so every step is retried a bounded number of
//! times. A BMS that cannot be reached is skipped until the next cycle.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! # use bmsread::{BluestTransport, JsonPublisher, Poller, Shutdown};
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let transport = BluestTransport::new().await.unwrap();
//!     let publisher = JsonPublisher::stdout("liontron", "liontron");
//!     let devices = vec!["A4:C1:38:00:11:22".parse().unwrap()];
//!     let mut poller = Poller::new(transport, publisher, devices, Duration::from_secs(60));
//!     poller.run(Shutdown::never()).await;
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod message;
pub mod protection;
pub mod publish;
pub mod retry;
pub mod scheduler;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use config::{Config, DeviceAddress};
pub use error::{CycleError, FrameError, PublishError, RetryError, TransportError};
pub use protection::ProtectionState;
pub use publish::{JsonPublisher, Publisher};
pub use retry::RetryPolicy;
pub use scheduler::{PollSummary, Poller, Shutdown, ShutdownTrigger};
pub use session::{Session, SessionState};
pub use telemetry::TelemetryRecord;
pub use transport::bluetooth::BluestTransport;
pub use transport::{BleLink, BleTransport};
