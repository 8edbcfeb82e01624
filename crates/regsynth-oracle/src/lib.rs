//! Register oracle
//!
//! A protocol test server that serves registers only at addresses in its
//! allow-list and answers everything else with an "illegal data address"
//! exception. Used as ground truth when testing synthesized drivers.
//!
//! # Example
//!
//! ```rust,no_run
//! use regsynth_oracle::{ModbusClient, Oracle};
//! use regsynth_registers::{FunctionClass, ValidAddressSet};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let oracle = Oracle::ephemeral(ValidAddressSet::uniform(30000..30100)).await?;
//! let session = oracle.session().await;
//! let mut client = ModbusClient::connect(session.endpoint()).await?;
//! let values = client.read_registers(FunctionClass::ReadHolding, 30000, 2).await?;
//! assert_eq!(values.len(), 2);
//! # Ok(())
//! # }
//! ```

#![allow(missing_docs)]

pub mod client;
pub mod error;
pub mod server;
pub mod session;
pub mod store;
pub mod wire;

pub use client::ModbusClient;
pub use error::{ClientError, ExceptionCode, OracleError, StoreError, WireError};
pub use server::{Rejection, ServerStats, TestServer};
pub use session::{Oracle, OracleSession};
pub use store::{AllowListSnapshot, ValidatingStore};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
