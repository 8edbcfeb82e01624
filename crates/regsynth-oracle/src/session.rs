//! Oracle sessions
//!
//! Reconfiguring the allow-list and testing a candidate against it must not
//! interleave with another synthesis doing the same. [`Oracle::session`]
//! hands out one exclusive guard at a time; everything between configure and
//! the end of the test happens while holding it.

use crate::error::OracleError;
use crate::server::{Rejection, ServerStats, TestServer};
use crate::store::{AllowListSnapshot, ValidatingStore};
use regsynth_registers::{FunctionClass, ValidAddressSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Test server plus the session gate
#[derive(Debug)]
pub struct Oracle {
    server: TestServer,
    gate: Mutex<()>,
}

impl Oracle {
    /// Start a server on `bind` with an initial allow-list
    ///
    /// # Errors
    /// `OracleError::Bind` if the listener cannot be bound
    pub async fn start(bind: SocketAddr, initial: ValidAddressSet) -> Result<Self, OracleError> {
        let store = Arc::new(ValidatingStore::new(initial));
        let server = TestServer::bind(bind, store).await?;
        Ok(Self::from_server(server))
    }

    /// Start on an ephemeral localhost port
    ///
    /// # Errors
    /// `OracleError::Bind` if the listener cannot be bound
    pub async fn ephemeral(initial: ValidAddressSet) -> Result<Self, OracleError> {
        Self::start(SocketAddr::from(([127, 0, 0, 1], 0)), initial).await
    }

    /// Wrap an already running server
    #[must_use]
    pub fn from_server(server: TestServer) -> Self {
        Self {
            server,
            gate: Mutex::new(()),
        }
    }

    /// Wait for exclusive use of the oracle
    pub async fn session(&self) -> OracleSession<'_> {
        let guard = self.gate.lock().await;
        tracing::debug!(epoch = self.server.store().epoch(), "oracle session opened");
        OracleSession {
            oracle: self,
            _guard: guard,
        }
    }

    /// Underlying server
    #[inline]
    #[must_use]
    pub fn server(&self) -> &TestServer {
        &self.server
    }

    /// Endpoint candidates connect to
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.server.local_addr()
    }
}

/// Exclusive access to the oracle
///
/// Dropping it (including when the owning future is cancelled) releases the
/// gate; the allow-list keeps whichever complete snapshot was last installed.
#[derive(Debug)]
pub struct OracleSession<'a> {
    oracle: &'a Oracle,
    _guard: MutexGuard<'a, ()>,
}

impl OracleSession<'_> {
    /// Install a new allow-list for every class; returns the new epoch
    pub fn configure(&self, addresses: ValidAddressSet) -> u64 {
        self.store().configure_all(addresses)
    }

    /// Replace the allow-list of one class; returns the new epoch
    pub fn configure_class(
        &self,
        class: FunctionClass,
        addresses: impl IntoIterator<Item = u16>,
    ) -> u64 {
        self.store().configure(class, addresses.into_iter().collect())
    }

    /// Current epoch
    #[inline]
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.store().epoch()
    }

    /// Current allow-list
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> Arc<AllowListSnapshot> {
        self.store().snapshot()
    }

    /// Endpoint candidates connect to
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> SocketAddr {
        self.oracle.endpoint()
    }

    /// Most recent rejection
    #[inline]
    #[must_use]
    pub fn last_rejection(&self) -> Option<Rejection> {
        self.oracle.server.last_rejection()
    }

    /// Rejections recorded at or after `epoch`, oldest first
    #[inline]
    #[must_use]
    pub fn rejections_since(&self, epoch: u64) -> Vec<Rejection> {
        self.oracle.server.rejections_since(epoch)
    }

    /// Server counters
    #[inline]
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        self.oracle.server.stats()
    }

    /// Store behind the server
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ValidatingStore> {
        self.oracle.server.store()
    }
}
