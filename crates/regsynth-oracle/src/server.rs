//! Protocol Test Server
//!
//! A tokio TCP listener serving the [`ValidatingStore`]. One task per
//! connection; all of them are aborted when the server shuts down or drops.

use crate::error::{ExceptionCode, OracleError, StoreError};
use crate::store::ValidatingStore;
use crate::wire::{
    self, encode_frame, read_frame, MbapHeader, RequestPdu, ResponsePdu, MAX_READ_QUANTITY,
    MAX_WRITE_QUANTITY,
};
use parking_lot::Mutex;
use regsynth_registers::FunctionClass;
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::{JoinHandle, JoinSet};

/// Rejections kept in the journal
pub const REJECTION_JOURNAL_CAPACITY: usize = 64;

/// One illegal-address rejection
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Register class the request addressed
    pub class: FunctionClass,
    /// Function code of the rejected request
    pub function: u8,
    /// Requested start address
    pub start: u16,
    /// Requested quantity
    pub count: u16,
    /// First address of the request outside the allow-list
    pub first_offending: u16,
    /// Allow-list epoch the request was validated against
    pub epoch: u64,
}

impl Rejection {
    /// Whether the first offending address lies in `[start, start+count)`
    #[must_use]
    pub fn covers(&self, start: u16, count: u16) -> bool {
        let end = u32::from(start) + u32::from(count);
        (u32::from(start)..end).contains(&u32::from(self.first_offending))
    }
}

/// Counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Connections accepted since start
    pub connections_accepted: u64,
    /// Request frames answered, exceptions included
    pub requests_served: u64,
    /// Requests rejected with illegal data address
    pub illegal_address_rejections: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections: AtomicU64,
    requests: AtomicU64,
    rejections: AtomicU64,
}

/// State shared by the accept loop and every connection task
#[derive(Debug)]
struct Shared {
    store: Arc<ValidatingStore>,
    counters: Counters,
    journal: Mutex<VecDeque<Rejection>>,
}

impl Shared {
    fn record_rejection(&self, rejection: Rejection) {
        self.counters.rejections.fetch_add(1, Ordering::Relaxed);
        let mut journal = self.journal.lock();
        if journal.len() == REJECTION_JOURNAL_CAPACITY {
            journal.pop_front();
        }
        journal.push_back(rejection);
    }
}

/// Running test server
#[derive(Debug)]
pub struct TestServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    /// Bind and start serving `store`
    ///
    /// # Errors
    /// `OracleError::Bind` if the listener cannot be bound
    pub async fn bind(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        store: Arc<ValidatingStore>,
    ) -> Result<Self, OracleError> {
        let label = format!("{addr:?}");
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| OracleError::Bind {
                addr: label,
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            store,
            counters: Counters::default(),
            journal: Mutex::new(VecDeque::with_capacity(REJECTION_JOURNAL_CAPACITY)),
        });

        let accept_task = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        tracing::info!(%local_addr, "test server listening");

        Ok(Self {
            local_addr,
            shared,
            accept_task,
        })
    }

    /// Bound address (useful when binding port 0)
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Store being served
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<ValidatingStore> {
        &self.shared.store
    }

    /// Counters
    #[must_use]
    pub fn stats(&self) -> ServerStats {
        let c = &self.shared.counters;
        ServerStats {
            connections_accepted: c.connections.load(Ordering::Relaxed),
            requests_served: c.requests.load(Ordering::Relaxed),
            illegal_address_rejections: c.rejections.load(Ordering::Relaxed),
        }
    }

    /// Most recent illegal-address rejection
    #[must_use]
    pub fn last_rejection(&self) -> Option<Rejection> {
        self.shared.journal.lock().back().cloned()
    }

    /// Rejections recorded at or after `epoch`, oldest first
    #[must_use]
    pub fn rejections_since(&self, epoch: u64) -> Vec<Rejection> {
        self.shared
            .journal
            .lock()
            .iter()
            .filter(|r| r.epoch >= epoch)
            .cloned()
            .collect()
    }

    /// Stop accepting and close every connection
    pub async fn shutdown(mut self) {
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
        tracing::info!("test server stopped");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    // Dropping the set aborts every connection task
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    shared.counters.connections.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(%peer, "connection accepted");
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&shared)));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_connection(mut stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    loop {
        let (header, pdu) = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(%peer, error = %e, "malformed frame, closing connection");
                break;
            }
        };

        let response = dispatch(&shared, &pdu);
        shared.counters.requests.fetch_add(1, Ordering::Relaxed);

        let bytes = encode_frame(
            MbapHeader {
                transaction_id: header.transaction_id,
                unit_id: header.unit_id,
            },
            &response.encode(),
        );
        if let Err(e) = stream.write_all(&bytes).await {
            tracing::debug!(%peer, error = %e, "write failed");
            break;
        }
    }
    tracing::debug!(%peer, "connection closed");
}

fn dispatch(shared: &Shared, pdu: &[u8]) -> ResponsePdu {
    let request = match RequestPdu::decode(pdu) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "undecodable request PDU");
            return ResponsePdu::Exception {
                function: pdu.first().copied().unwrap_or(0) & 0x7F,
                code: ExceptionCode::IllegalDataValue,
            };
        }
    };
    let function = request.function_code();
    tracing::debug!(?request, "request");

    let result = match &request {
        RequestPdu::ReadHolding { start, quantity } | RequestPdu::ReadInput { start, quantity } => {
            let class = if function == wire::function::READ_HOLDING {
                FunctionClass::ReadHolding
            } else {
                FunctionClass::ReadInput
            };
            if *quantity > MAX_READ_QUANTITY {
                Err(StoreError::IllegalQuantity { count: *quantity })
            } else {
                shared
                    .store
                    .read(class, *start, *quantity)
                    .map(|values| ResponsePdu::Registers { function, values })
            }
        }
        RequestPdu::WriteSingle { address, value } => shared
            .store
            .write(*address, &[*value])
            .map(|()| ResponsePdu::WriteSingleAck {
                address: *address,
                value: *value,
            }),
        RequestPdu::WriteMultiple { start, values } => {
            let quantity = u16::try_from(values.len()).unwrap_or(u16::MAX);
            if quantity > MAX_WRITE_QUANTITY {
                Err(StoreError::IllegalQuantity { count: quantity })
            } else {
                shared
                    .store
                    .write(*start, values)
                    .map(|()| ResponsePdu::WriteMultipleAck {
                        start: *start,
                        quantity,
                    })
            }
        }
        RequestPdu::Unsupported { function } => {
            tracing::warn!(function = format!("0x{function:02X}"), "unsupported function");
            return ResponsePdu::Exception {
                function: *function & 0x7F,
                code: ExceptionCode::IllegalFunction,
            };
        }
    };

    result.unwrap_or_else(|err| {
        if let StoreError::IllegalAddress {
            class,
            address,
            start,
            count,
            epoch,
        } = &err
        {
            shared.record_rejection(Rejection {
                class: *class,
                function,
                start: *start,
                count: *count,
                first_offending: *address,
                epoch: *epoch,
            });
        }
        ResponsePdu::Exception {
            function,
            code: err.exception_code(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use regsynth_registers::ValidAddressSet;

    fn shared() -> Shared {
        Shared {
            store: Arc::new(ValidatingStore::new(ValidAddressSet::uniform(30000..30010))),
            counters: Counters::default(),
            journal: Mutex::new(VecDeque::new()),
        }
    }

    #[test]
    fn dispatch_read_inside() {
        let shared = shared();
        let pdu = RequestPdu::ReadInput {
            start: 30000,
            quantity: 2,
        }
        .encode();
        assert_eq!(
            dispatch(&shared, &pdu),
            ResponsePdu::Registers {
                function: 0x04,
                values: vec![1, 1]
            }
        );
    }

    #[test]
    fn dispatch_records_rejection() {
        let shared = shared();
        let pdu = RequestPdu::ReadHolding {
            start: 30008,
            quantity: 4,
        }
        .encode();
        assert_eq!(
            dispatch(&shared, &pdu),
            ResponsePdu::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataAddress
            }
        );
        let journal = shared.journal.lock();
        let rejection = journal.back().unwrap();
        assert_eq!(rejection.first_offending, 30010);
        assert!(rejection.covers(30008, 4));
        assert!(!rejection.covers(30000, 2));
    }

    #[test]
    fn journal_records_epoch_of_rejecting_allow_list() {
        let shared = shared();
        shared
            .store
            .configure(FunctionClass::ReadInput, [7u16].into_iter().collect());
        let pdu = RequestPdu::ReadInput {
            start: 30000,
            quantity: 1,
        }
        .encode();
        dispatch(&shared, &pdu);

        let journal = shared.journal.lock();
        let rejection = journal.back().unwrap();
        assert_eq!(rejection.epoch, 1);
        assert_eq!(rejection.class, FunctionClass::ReadInput);
    }

    #[test]
    fn dispatch_quantity_limits() {
        let shared = shared();
        let pdu = RequestPdu::ReadHolding {
            start: 30000,
            quantity: 126,
        }
        .encode();
        assert_eq!(
            dispatch(&shared, &pdu),
            ResponsePdu::Exception {
                function: 0x03,
                code: ExceptionCode::IllegalDataValue
            }
        );
    }

    #[test]
    fn dispatch_unsupported_function() {
        assert_eq!(
            dispatch(&shared(), &[0x01, 0x00, 0x00, 0x00, 0x01]),
            ResponsePdu::Exception {
                function: 0x01,
                code: ExceptionCode::IllegalFunction
            }
        );
    }

    #[test]
    fn journal_is_bounded() {
        let shared = shared();
        for i in 0..(REJECTION_JOURNAL_CAPACITY + 5) {
            let pdu = RequestPdu::ReadHolding {
                start: u16::try_from(i).unwrap(),
                quantity: 1,
            }
            .encode();
            dispatch(&shared, &pdu);
        }
        assert_eq!(shared.journal.lock().len(), REJECTION_JOURNAL_CAPACITY);
        assert_eq!(
            shared.counters.rejections.load(Ordering::Relaxed),
            (REJECTION_JOURNAL_CAPACITY + 5) as u64
        );
    }
}
