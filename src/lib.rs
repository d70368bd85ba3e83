//! Wire-level Modbus engine usable from either side of the protocol.
//!
//! A [`master::Master`] polls remote units over TCP, UDP or a serial line
//! (RTU, ASCII or BIN framing), correlating replies by transaction id and
//! retrying transport failures. A [`listener::Listener`] serves the same
//! function codes out of a [`image::ProcessImage`], an in-memory data
//! store with one sparse address space per object kind.
//!
//! Both sides exchange bytes through a [`terminal::Terminal`], a pair of
//! background tasks that pump send and receive queues so that callers
//! never block on the wire.
//!
//! ```no_run
//! use fieldbus::master::Master;
//! use fieldbus::types::{AddressRange, UnitId};
//!
//! async fn poll() -> Result<(), fieldbus::error::RequestError> {
//!     let mut master = Master::tcp("10.0.0.5:502".parse().unwrap());
//!     master.activate().await?;
//!     let range = AddressRange::try_from(0, 10)?;
//!     let registers = master
//!         .read_holding_registers(UnitId::new(1), range)
//!         .await?;
//!     println!("{registers:?}");
//!     master.deactivate().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod exception;
pub mod image;
pub mod listener;
pub mod master;
pub mod pdu;
pub mod terminal;
pub mod types;

pub(crate) mod common;
pub(crate) mod framing;

pub use config::{ConnectionConfig, SerialEncoding};
pub use exception::ExceptionCode;
pub use image::{Fifo, ProcessImage, RecordFile};
pub use listener::Listener;
pub use master::Master;
pub use terminal::Terminal;
pub use types::{AddressRange, Indexed, RecordRef, RecordWrite, UnitId, WriteMultiple};
