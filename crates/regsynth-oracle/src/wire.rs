//! Modbus TCP framing
//!
//! MBAP header (7 bytes) followed by the PDU. Only the register functions the
//! oracle serves are modelled; anything else decodes to
//! [`RequestPdu::Unsupported`] and is answered with an illegal-function
//! exception.

use crate::error::{ExceptionCode, WireError};
use tokio::io::{AsyncRead, AsyncReadExt};

/// MBAP header length including the unit id
pub const MBAP_HEADER_LEN: usize = 7;

/// Largest frame accepted on either side
pub const MAX_FRAME_LEN: usize = 260;

/// Largest quantity for a register read
pub const MAX_READ_QUANTITY: u16 = 125;

/// Largest quantity for a multiple-register write
pub const MAX_WRITE_QUANTITY: u16 = 123;

/// Function codes
pub mod function {
    /// Read holding registers
    pub const READ_HOLDING: u8 = 0x03;
    /// Read input registers
    pub const READ_INPUT: u8 = 0x04;
    /// Write single register
    pub const WRITE_SINGLE: u8 = 0x06;
    /// Write multiple registers
    pub const WRITE_MULTIPLE: u8 = 0x10;
}

/// MBAP header fields the peers care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    /// Echoed back in the response
    pub transaction_id: u16,
    /// Addressed unit
    pub unit_id: u8,
}

/// Request PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestPdu {
    /// 0x03
    ReadHolding {
        /// First register
        start: u16,
        /// Registers to read
        quantity: u16,
    },
    /// 0x04
    ReadInput {
        /// First register
        start: u16,
        /// Registers to read
        quantity: u16,
    },
    /// 0x06
    WriteSingle {
        /// Target register
        address: u16,
        /// Value to store
        value: u16,
    },
    /// 0x10
    WriteMultiple {
        /// First register
        start: u16,
        /// Values in address order
        values: Vec<u16>,
    },
    /// Any other function code
    Unsupported {
        /// Raw function byte
        function: u8,
    },
}

impl RequestPdu {
    /// Function code byte
    #[must_use]
    pub fn function_code(&self) -> u8 {
        match self {
            RequestPdu::ReadHolding { .. } => function::READ_HOLDING,
            RequestPdu::ReadInput { .. } => function::READ_INPUT,
            RequestPdu::WriteSingle { .. } => function::WRITE_SINGLE,
            RequestPdu::WriteMultiple { .. } => function::WRITE_MULTIPLE,
            RequestPdu::Unsupported { function } => *function,
        }
    }

    /// Start address and quantity the request touches
    #[must_use]
    pub fn span(&self) -> (u16, u16) {
        match self {
            RequestPdu::ReadHolding { start, quantity } | RequestPdu::ReadInput { start, quantity } => {
                (*start, *quantity)
            }
            RequestPdu::WriteSingle { address, .. } => (*address, 1),
            RequestPdu::WriteMultiple { start, values } => {
                (*start, u16::try_from(values.len()).unwrap_or(u16::MAX))
            }
            RequestPdu::Unsupported { .. } => (0, 0),
        }
    }

    /// Encode to PDU bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.function_code()];
        match self {
            RequestPdu::ReadHolding { start, quantity } | RequestPdu::ReadInput { start, quantity } => {
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&quantity.to_be_bytes());
            }
            RequestPdu::WriteSingle { address, value } => {
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
            }
            RequestPdu::WriteMultiple { start, values } => {
                let quantity = u16::try_from(values.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&quantity.to_be_bytes());
                out.push(u8::try_from(values.len() * 2).unwrap_or(u8::MAX));
                for value in values {
                    out.extend_from_slice(&value.to_be_bytes());
                }
            }
            RequestPdu::Unsupported { .. } => {}
        }
        out
    }

    /// Decode PDU bytes
    ///
    /// # Errors
    /// `WireError` when the PDU is shorter than its function requires or the
    /// byte count disagrees with the payload.
    pub fn decode(pdu: &[u8]) -> Result<Self, WireError> {
        let (&fc, body) = pdu
            .split_first()
            .ok_or(WireError::Truncated { needed: 1, got: 0 })?;
        match fc {
            function::READ_HOLDING | function::READ_INPUT => {
                let start = be_u16(body, 0)?;
                let quantity = be_u16(body, 2)?;
                Ok(if fc == function::READ_HOLDING {
                    RequestPdu::ReadHolding { start, quantity }
                } else {
                    RequestPdu::ReadInput { start, quantity }
                })
            }
            function::WRITE_SINGLE => Ok(RequestPdu::WriteSingle {
                address: be_u16(body, 0)?,
                value: be_u16(body, 2)?,
            }),
            function::WRITE_MULTIPLE => {
                let start = be_u16(body, 0)?;
                let quantity = usize::from(be_u16(body, 2)?);
                let byte_count = usize::from(*body.get(4).ok_or(WireError::Truncated {
                    needed: 5,
                    got: body.len(),
                })?);
                let payload = &body[5..];
                if byte_count != quantity * 2 || payload.len() != byte_count {
                    return Err(WireError::ByteCount {
                        declared: byte_count,
                        actual: payload.len(),
                    });
                }
                Ok(RequestPdu::WriteMultiple {
                    start,
                    values: words(payload),
                })
            }
            function => Ok(RequestPdu::Unsupported { function }),
        }
    }
}

/// Response PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePdu {
    /// Values for a read request
    Registers {
        /// 0x03 or 0x04
        function: u8,
        /// Register values in address order
        values: Vec<u16>,
    },
    /// Echo of a single write
    WriteSingleAck {
        /// Written register
        address: u16,
        /// Written value
        value: u16,
    },
    /// Acknowledgement of a multiple write
    WriteMultipleAck {
        /// First written register
        start: u16,
        /// Registers written
        quantity: u16,
    },
    /// Exception response; the function byte is sent with the high bit set
    Exception {
        /// Function code of the request, without the error bit
        function: u8,
        /// Exception code
        code: ExceptionCode,
    },
}

impl ResponsePdu {
    /// Encode to PDU bytes
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ResponsePdu::Registers { function, values } => {
                let mut out = Vec::with_capacity(2 + values.len() * 2);
                out.push(*function);
                out.push(u8::try_from(values.len() * 2).unwrap_or(u8::MAX));
                for value in values {
                    out.extend_from_slice(&value.to_be_bytes());
                }
                out
            }
            ResponsePdu::WriteSingleAck { address, value } => {
                let mut out = vec![function::WRITE_SINGLE];
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&value.to_be_bytes());
                out
            }
            ResponsePdu::WriteMultipleAck { start, quantity } => {
                let mut out = vec![function::WRITE_MULTIPLE];
                out.extend_from_slice(&start.to_be_bytes());
                out.extend_from_slice(&quantity.to_be_bytes());
                out
            }
            ResponsePdu::Exception { function, code } => vec![function | 0x80, code.code()],
        }
    }

    /// Decode PDU bytes
    ///
    /// # Errors
    /// `WireError` for truncated payloads or inconsistent byte counts
    pub fn decode(pdu: &[u8]) -> Result<Self, WireError> {
        let (&fc, body) = pdu
            .split_first()
            .ok_or(WireError::Truncated { needed: 1, got: 0 })?;
        if fc & 0x80 != 0 {
            let code = *body.first().ok_or(WireError::Truncated { needed: 2, got: 1 })?;
            return Ok(ResponsePdu::Exception {
                function: fc & 0x7F,
                code: ExceptionCode::from_code(code),
            });
        }
        match fc {
            function::WRITE_SINGLE => Ok(ResponsePdu::WriteSingleAck {
                address: be_u16(body, 0)?,
                value: be_u16(body, 2)?,
            }),
            function::WRITE_MULTIPLE => Ok(ResponsePdu::WriteMultipleAck {
                start: be_u16(body, 0)?,
                quantity: be_u16(body, 2)?,
            }),
            function => {
                let byte_count = usize::from(*body.first().ok_or(WireError::Truncated {
                    needed: 2,
                    got: 1,
                })?);
                let payload = &body[1..];
                if payload.len() != byte_count || byte_count % 2 != 0 {
                    return Err(WireError::ByteCount {
                        declared: byte_count,
                        actual: payload.len(),
                    });
                }
                Ok(ResponsePdu::Registers {
                    function,
                    values: words(payload),
                })
            }
        }
    }
}

/// Wrap PDU bytes in an MBAP frame
#[must_use]
pub fn encode_frame(header: MbapHeader, pdu: &[u8]) -> Vec<u8> {
    let length = u16::try_from(pdu.len() + 1).unwrap_or(u16::MAX);
    let mut out = Vec::with_capacity(MBAP_HEADER_LEN + pdu.len());
    out.extend_from_slice(&header.transaction_id.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.push(header.unit_id);
    out.extend_from_slice(pdu);
    out
}

/// Read one frame
///
/// Returns `Ok(None)` when the peer closed the stream cleanly between frames.
///
/// # Errors
/// - `WireError::ProtocolId` for a non-zero protocol id
/// - `WireError::Length` for lengths outside `2..=MAX_FRAME_LEN - 6`
/// - `WireError::Truncated` when the stream ends mid-frame
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(MbapHeader, Vec<u8>)>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; MBAP_HEADER_LEN];
    let first = read_fully(reader, &mut header).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < MBAP_HEADER_LEN {
        return Err(WireError::Truncated {
            needed: MBAP_HEADER_LEN,
            got: first,
        });
    }

    let transaction_id = u16::from_be_bytes([header[0], header[1]]);
    let protocol_id = u16::from_be_bytes([header[2], header[3]]);
    let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
    let unit_id = header[6];

    if protocol_id != 0 {
        return Err(WireError::ProtocolId(protocol_id));
    }
    // length counts the unit id plus the PDU
    if length < 2 || length + MBAP_HEADER_LEN - 1 > MAX_FRAME_LEN {
        return Err(WireError::Length(length));
    }

    let mut pdu = vec![0u8; length - 1];
    let got = read_fully(reader, &mut pdu).await?;
    if got < pdu.len() {
        return Err(WireError::Truncated {
            needed: pdu.len(),
            got,
        });
    }

    Ok(Some((
        MbapHeader {
            transaction_id,
            unit_id,
        },
        pdu,
    )))
}

async fn read_fully<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => {
                return Err(WireError::Truncated {
                    needed: buf.len(),
                    got: filled,
                })
            }
        }
    }
    Ok(filled)
}

fn be_u16(body: &[u8], offset: usize) -> Result<u16, WireError> {
    match body.get(offset..offset + 2) {
        Some(bytes) => Ok(u16::from_be_bytes([bytes[0], bytes[1]])),
        None => Err(WireError::Truncated {
            needed: offset + 3,
            got: body.len() + 1,
        }),
    }
}

fn words(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_bytes() {
        let pdu = RequestPdu::ReadHolding {
            start: 30000,
            quantity: 2,
        };
        assert_eq!(pdu.encode(), vec![0x03, 0x75, 0x30, 0x00, 0x02]);
        assert_eq!(RequestPdu::decode(&pdu.encode()).unwrap(), pdu);
    }

    #[test]
    fn write_multiple_checks_byte_count() {
        let bad = [0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x01];
        assert!(matches!(
            RequestPdu::decode(&bad),
            Err(WireError::ByteCount { declared: 4, actual: 2 })
        ));
    }

    #[test]
    fn unknown_function_is_unsupported() {
        assert_eq!(
            RequestPdu::decode(&[0x2B, 0x0E]).unwrap(),
            RequestPdu::Unsupported { function: 0x2B }
        );
    }

    #[test]
    fn exception_response_bytes() {
        let pdu = ResponsePdu::Exception {
            function: 0x03,
            code: ExceptionCode::IllegalDataAddress,
        };
        assert_eq!(pdu.encode(), vec![0x83, 0x02]);
        assert_eq!(ResponsePdu::decode(&[0x83, 0x02]).unwrap(), pdu);
    }

    #[test]
    fn truncated_read_request() {
        assert!(matches!(
            RequestPdu::decode(&[0x03, 0x00]),
            Err(WireError::Truncated { .. })
        ));
    }

    #[tokio::test]
    async fn frame_roundtrip_over_a_stream() {
        let header = MbapHeader {
            transaction_id: 7,
            unit_id: 1,
        };
        let bytes = encode_frame(header, &[0x04, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(&bytes[..7], &[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01]);

        let mut reader = &bytes[..];
        let (got_header, pdu) = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(got_header, header);
        assert_eq!(pdu, vec![0x04, 0x00, 0x00, 0x00, 0x01]);
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_zero_protocol_id_is_malformed() {
        let bytes = [0x00, 0x01, 0x00, 0x01, 0x00, 0x02, 0x01, 0x03];
        let mut reader = &bytes[..];
        assert_eq!(
            read_frame(&mut reader).await.unwrap_err(),
            WireError::ProtocolId(1)
        );
    }

    #[tokio::test]
    async fn oversized_length_is_malformed() {
        let bytes = [0x00, 0x01, 0x00, 0x00, 0x01, 0x00, 0x01];
        let mut reader = &bytes[..];
        assert_eq!(
            read_frame(&mut reader).await.unwrap_err(),
            WireError::Length(256)
        );
    }
}
