//! Minimal Modbus TCP client used by candidate runtimes and the fallback test

use crate::error::ClientError;
use crate::wire::{encode_frame, read_frame, MbapHeader, RequestPdu, ResponsePdu};
use regsynth_registers::FunctionClass;
use std::net::SocketAddr;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Default unit id
pub const DEFAULT_UNIT_ID: u8 = 1;

/// One connection to a register server
#[derive(Debug)]
pub struct ModbusClient {
    stream: TcpStream,
    peer: SocketAddr,
    unit_id: u8,
    next_transaction: u16,
}

impl ModbusClient {
    /// Connect to `addr`
    ///
    /// # Errors
    /// `ClientError::Connect` if the TCP connection cannot be established
    pub async fn connect(addr: SocketAddr) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ClientError::Connect { addr, source })?;
        let _ = stream.set_nodelay(true);
        Ok(Self {
            stream,
            peer: addr,
            unit_id: DEFAULT_UNIT_ID,
            next_transaction: 1,
        })
    }

    /// Use a different unit id
    #[inline]
    #[must_use]
    pub fn with_unit_id(mut self, unit_id: u8) -> Self {
        self.unit_id = unit_id;
        self
    }

    /// Server address
    #[inline]
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Read `count` registers of `class` starting at `start`
    ///
    /// # Errors
    /// - `ClientError::Exception` when the server answers with an exception
    /// - transport and framing errors otherwise
    pub async fn read_registers(
        &mut self,
        class: FunctionClass,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        let request = match class {
            FunctionClass::ReadHolding => RequestPdu::ReadHolding {
                start,
                quantity: count,
            },
            FunctionClass::ReadInput => RequestPdu::ReadInput {
                start,
                quantity: count,
            },
        };
        match self.call(&request).await? {
            ResponsePdu::Registers { function, values } if function == request.function_code() => {
                if values.len() == usize::from(count) {
                    Ok(values)
                } else {
                    Err(ClientError::UnexpectedResponse(format!(
                        "asked for {count} registers, got {}",
                        values.len()
                    )))
                }
            }
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    /// Write holding registers starting at `start`
    ///
    /// A single value uses function 0x06, more use 0x10.
    ///
    /// # Errors
    /// Same as [`read_registers`](Self::read_registers)
    pub async fn write_registers(&mut self, start: u16, values: &[u16]) -> Result<(), ClientError> {
        let request = match values {
            [value] => RequestPdu::WriteSingle {
                address: start,
                value: *value,
            },
            _ => RequestPdu::WriteMultiple {
                start,
                values: values.to_vec(),
            },
        };
        match self.call(&request).await? {
            ResponsePdu::WriteSingleAck { .. } | ResponsePdu::WriteMultipleAck { .. } => Ok(()),
            other => Err(ClientError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    async fn call(&mut self, request: &RequestPdu) -> Result<ResponsePdu, ClientError> {
        let transaction_id = self.next_transaction;
        self.next_transaction = self.next_transaction.wrapping_add(1);

        let frame = encode_frame(
            MbapHeader {
                transaction_id,
                unit_id: self.unit_id,
            },
            &request.encode(),
        );
        self.stream.write_all(&frame).await?;

        let (header, pdu) = read_frame(&mut self.stream)
            .await?
            .ok_or(ClientError::Closed)?;
        if header.transaction_id != transaction_id {
            return Err(ClientError::UnexpectedResponse(format!(
                "transaction id {} does not answer {transaction_id}",
                header.transaction_id
            )));
        }

        match ResponsePdu::decode(&pdu)? {
            ResponsePdu::Exception { function, code } => {
                let (start, count) = request.span();
                tracing::debug!(%code, start, count, "exception response");
                Err(ClientError::Exception {
                    function,
                    code,
                    start,
                    count,
                })
            }
            response => Ok(response),
        }
    }
}

