//! Error types for the oracle
//!
//! - Store rejections (illegal address, illegal quantity)
//! - Wire framing failures
//! - Client-side failures, including protocol exceptions

use regsynth_registers::FunctionClass;
use std::fmt;
use std::net::SocketAddr;

/// Protocol exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionCode {
    /// 0x01
    IllegalFunction,
    /// 0x02
    IllegalDataAddress,
    /// 0x03
    IllegalDataValue,
    /// 0x04
    ServerDeviceFailure,
    /// Any other code
    Other(u8),
}

impl ExceptionCode {
    /// Code byte on the wire
    #[inline]
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            ExceptionCode::IllegalFunction => 0x01,
            ExceptionCode::IllegalDataAddress => 0x02,
            ExceptionCode::IllegalDataValue => 0x03,
            ExceptionCode::ServerDeviceFailure => 0x04,
            ExceptionCode::Other(c) => c,
        }
    }

    /// Decode a code byte
    #[inline]
    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => ExceptionCode::IllegalFunction,
            0x02 => ExceptionCode::IllegalDataAddress,
            0x03 => ExceptionCode::IllegalDataValue,
            0x04 => ExceptionCode::ServerDeviceFailure,
            other => ExceptionCode::Other(other),
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionCode::IllegalFunction => write!(f, "IllegalFunction (0x01)"),
            ExceptionCode::IllegalDataAddress => write!(f, "IllegalDataAddress (0x02)"),
            ExceptionCode::IllegalDataValue => write!(f, "IllegalDataValue (0x03)"),
            ExceptionCode::ServerDeviceFailure => write!(f, "ServerDeviceFailure (0x04)"),
            ExceptionCode::Other(c) => write!(f, "exception 0x{c:02X}"),
        }
    }
}

/// Rejections from the validating store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// At least one address of the request is outside the allow-list
    #[error("illegal data address {address} ({class} request {start}+{count})")]
    IllegalAddress {
        /// Class of the request
        class: FunctionClass,
        /// First offending address
        address: u16,
        /// Request start
        start: u16,
        /// Request quantity
        count: u16,
        /// Epoch of the allow-list snapshot the request was checked against
        epoch: u64,
    },

    /// Zero or oversized quantity
    #[error("illegal register quantity: {count}")]
    IllegalQuantity {
        /// Requested quantity
        count: u16,
    },
}

impl StoreError {
    /// Exception code this rejection maps to on the wire
    #[inline]
    #[must_use]
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            StoreError::IllegalAddress { .. } => ExceptionCode::IllegalDataAddress,
            StoreError::IllegalQuantity { .. } => ExceptionCode::IllegalDataValue,
        }
    }
}

/// Framing and PDU decoding failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Frame shorter than its header claims
    #[error("truncated frame: needed {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Protocol identifier other than 0
    #[error("unsupported protocol id {0}")]
    ProtocolId(u16),

    /// Length field outside the legal frame size
    #[error("invalid frame length {0}")]
    Length(usize),

    /// Byte count disagrees with the payload
    #[error("byte count {declared} does not match payload of {actual} bytes")]
    ByteCount {
        /// Declared byte count
        declared: usize,
        /// Bytes present
        actual: usize,
    },
}

/// Oracle lifecycle failures
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// Could not bind the listener
    #[error("failed to bind test server on {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Other IO failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Client-side failures talking to a register server
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP connect failed
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        /// Target address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Read/write on the socket failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Response frame could not be decoded
    #[error("malformed response: {0}")]
    Wire(#[from] WireError),

    /// Server closed the connection
    #[error("connection closed by server")]
    Closed,

    /// Server answered with a protocol exception
    #[error("{code} for function 0x{function:02X} at {start}+{count}")]
    Exception {
        /// Request function code
        function: u8,
        /// Exception code
        code: ExceptionCode,
        /// Request start address
        start: u16,
        /// Request quantity
        count: u16,
    },

    /// Response does not answer the request
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Whether this is an "illegal data address" exception
    #[inline]
    #[must_use]
    pub fn is_illegal_address(&self) -> bool {
        matches!(
            self,
            ClientError::Exception {
                code: ExceptionCode::IllegalDataAddress,
                ..
            }
        )
    }

    /// Whether the failure is a transport problem rather than a protocol answer
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Io(_) | ClientError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_code_roundtrip_known_codes() {
        for code in 1..=4u8 {
            assert_eq!(ExceptionCode::from_code(code).code(), code);
        }
        assert_eq!(ExceptionCode::from_code(0x0B), ExceptionCode::Other(0x0B));
    }

    #[test]
    fn store_error_maps_to_exception() {
        let err = StoreError::IllegalAddress {
            class: FunctionClass::ReadHolding,
            address: 5,
            start: 5,
            count: 1,
            epoch: 0,
        };
        assert_eq!(err.exception_code(), ExceptionCode::IllegalDataAddress);
        assert_eq!(
            StoreError::IllegalQuantity { count: 0 }.exception_code(),
            ExceptionCode::IllegalDataValue
        );
    }

    #[test]
    fn client_error_classification() {
        let err = ClientError::Exception {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
            start: 1,
            count: 1,
        };
        assert!(err.is_illegal_address());
        assert!(!err.is_transport());
        assert!(ClientError::Closed.is_transport());
    }
}
