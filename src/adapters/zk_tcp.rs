use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::adapters::device::{DeviceClient, DeviceConnector, DeviceError};
use crate::adapters::zk_protocol::{
    FRAME_PREFIX_LEN, FreeSizes, MAX_CHUNK, Packet, ProtocolError, USHRT_MAX,
    attendance_buffer_request, attendance_record_size, chunk_request, cmd, decode_attendance,
    decode_frame_prefix, decode_free_sizes, decode_packet, decode_users, encode_packet,
    make_comm_key, next_reply_id, users_buffer_request,
};
use crate::domain::device_address::DeviceAddress;
use crate::domain::models::{RawPunch, UserRecord};

#[derive(Debug, Clone, Copy, Default)]
pub struct ZkTcpConnector {
    comm_key: u32,
}

impl ZkTcpConnector {
    pub fn new(comm_key: u32) -> Self {
        Self { comm_key }
    }
}

impl DeviceConnector for ZkTcpConnector {
    fn connect(
        &self,
        address: &DeviceAddress,
        timeout: Duration,
    ) -> Result<Box<dyn DeviceClient>, DeviceError> {
        let client = ZkTcpClient::connect(address, timeout, self.comm_key)?;
        Ok(Box::new(client))
    }
}

/// Blocking ZKTeco client over TCP. Every socket read and write is bounded by
/// the timeout given at connect time.
#[derive(Debug)]
pub struct ZkTcpClient {
    stream: TcpStream,
    session_id: u16,
    reply_id: u16,
    connected: bool,
}

impl ZkTcpClient {
    pub fn connect(
        address: &DeviceAddress,
        timeout: Duration,
        comm_key: u32,
    ) -> Result<Self, DeviceError> {
        let target = resolve(address)?;

        tracing::info!(device = %address, timeout_ms = timeout.as_millis() as u64, "connecting to device");

        let stream = TcpStream::connect_timeout(&target, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut client = Self {
            stream,
            session_id: 0,
            reply_id: (USHRT_MAX - 1) as u16,
            connected: false,
        };

        let reply = client.execute(cmd::CMD_CONNECT, &[])?;
        client.session_id = reply.session_id;

        match reply.command {
            cmd::CMD_ACK_OK => {}
            cmd::CMD_ACK_UNAUTH => client.authenticate(comm_key)?,
            other => {
                return Err(DeviceError::UnexpectedReply {
                    command: cmd::CMD_CONNECT,
                    reply: other,
                });
            }
        }

        client.connected = true;
        tracing::info!(
            device = %address,
            session_id = client.session_id,
            "device connected"
        );
        Ok(client)
    }

    fn authenticate(&mut self, comm_key: u32) -> Result<(), DeviceError> {
        let key = make_comm_key(comm_key, self.session_id);
        let reply = self.execute(cmd::CMD_AUTH, &key)?;
        if reply.command != cmd::CMD_ACK_OK {
            tracing::warn!(reply = reply.command, "device rejected comm key");
            return Err(DeviceError::Unauthorized);
        }
        Ok(())
    }

    fn execute(&mut self, command: u16, data: &[u8]) -> Result<Packet, DeviceError> {
        let frame = encode_packet(command, self.session_id, self.reply_id, data);
        self.reply_id = next_reply_id(self.reply_id);
        self.stream.write_all(&frame)?;
        self.read_packet()
    }

    fn expect_ack(&mut self, command: u16, data: &[u8]) -> Result<Packet, DeviceError> {
        let reply = self.execute(command, data)?;
        if reply.command != cmd::CMD_ACK_OK {
            return Err(DeviceError::UnexpectedReply {
                command,
                reply: reply.command,
            });
        }
        Ok(reply)
    }

    /// Reads the next reply, skipping real-time event packets.
    fn read_packet(&mut self) -> Result<Packet, DeviceError> {
        loop {
            let mut prefix = [0_u8; FRAME_PREFIX_LEN];
            self.stream.read_exact(&mut prefix)?;
            let length = decode_frame_prefix(&prefix)?;

            let mut payload = vec![0_u8; length];
            self.stream.read_exact(&mut payload)?;
            let packet = decode_packet(&payload)?;

            if packet.command == cmd::CMD_REG_EVENT {
                tracing::debug!("skipping real-time event packet");
                continue;
            }
            return Ok(packet);
        }
    }

    fn read_sizes(&mut self) -> Result<FreeSizes, DeviceError> {
        let reply = self.expect_ack(cmd::CMD_GET_FREE_SIZES, &[])?;
        Ok(decode_free_sizes(&reply.data))
    }

    fn read_with_buffer(&mut self, request: &[u8]) -> Result<Vec<u8>, DeviceError> {
        let reply = self.execute(cmd::CMD_DATA_WRRQ, request)?;
        let buffer = match reply.command {
            cmd::CMD_DATA => reply.data,
            cmd::CMD_ACK_OK | cmd::CMD_PREPARE_DATA => {
                if reply.data.len() < 5 {
                    return Err(ProtocolError::Truncated {
                        expected: 5,
                        actual: reply.data.len(),
                    }
                    .into());
                }
                let size = u32::from_le_bytes([
                    reply.data[1],
                    reply.data[2],
                    reply.data[3],
                    reply.data[4],
                ]);
                self.read_chunks(size)?
            }
            other => {
                return Err(DeviceError::UnexpectedReply {
                    command: cmd::CMD_DATA_WRRQ,
                    reply: other,
                });
            }
        };

        self.expect_ack(cmd::CMD_FREE_DATA, &[])?;
        Ok(buffer)
    }

    fn read_chunks(&mut self, size: u32) -> Result<Vec<u8>, DeviceError> {
        tracing::debug!(size, "reading device buffer in chunks");

        let mut buffer = Vec::with_capacity(size as usize);
        let mut start = 0_u32;
        while start < size {
            let chunk = (size - start).min(MAX_CHUNK);
            let data = self.read_chunk(start, chunk)?;
            buffer.extend_from_slice(&data);
            start += chunk;
        }
        Ok(buffer)
    }

    fn read_chunk(&mut self, start: u32, size: u32) -> Result<Vec<u8>, DeviceError> {
        let reply = self.execute(cmd::CMD_DATA_RDY, &chunk_request(start, size))?;
        match reply.command {
            cmd::CMD_DATA => Ok(reply.data),
            cmd::CMD_PREPARE_DATA => {
                if reply.data.len() < 4 {
                    return Err(ProtocolError::Truncated {
                        expected: 4,
                        actual: reply.data.len(),
                    }
                    .into());
                }
                let expected = u32::from_le_bytes([
                    reply.data[0],
                    reply.data[1],
                    reply.data[2],
                    reply.data[3],
                ]) as usize;

                let mut data = Vec::with_capacity(expected);
                while data.len() < expected {
                    let packet = self.read_packet()?;
                    if packet.command != cmd::CMD_DATA {
                        return Err(DeviceError::UnexpectedReply {
                            command: cmd::CMD_DATA_RDY,
                            reply: packet.command,
                        });
                    }
                    data.extend_from_slice(&packet.data);
                }

                let done = self.read_packet()?;
                if done.command != cmd::CMD_ACK_OK {
                    return Err(DeviceError::UnexpectedReply {
                        command: cmd::CMD_DATA_RDY,
                        reply: done.command,
                    });
                }
                Ok(data)
            }
            other => Err(DeviceError::UnexpectedReply {
                command: cmd::CMD_DATA_RDY,
                reply: other,
            }),
        }
    }
}

impl DeviceClient for ZkTcpClient {
    fn get_users(&mut self) -> Result<Vec<UserRecord>, DeviceError> {
        let sizes = self.read_sizes()?;
        let buffer = self.read_with_buffer(&users_buffer_request())?;
        let users = decode_users(&buffer, sizes.users)?;
        Ok(users)
    }

    fn get_attendance(&mut self) -> Result<Vec<RawPunch>, DeviceError> {
        let sizes = self.read_sizes()?;
        let buffer = self.read_with_buffer(&attendance_buffer_request())?;

        let roster = if attendance_record_size(&buffer, sizes.records) == Some(8) {
            tracing::debug!("compact attendance records carry uids, reading roster");
            self.get_users()?
        } else {
            Vec::new()
        };

        let punches = decode_attendance(&buffer, sizes.records, &roster)?;
        Ok(punches)
    }

    fn disable_device(&mut self) -> Result<(), DeviceError> {
        self.expect_ack(cmd::CMD_DISABLEDEVICE, &[])?;
        Ok(())
    }

    fn enable_device(&mut self) -> Result<(), DeviceError> {
        self.expect_ack(cmd::CMD_ENABLEDEVICE, &[])?;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;

        let result = self.expect_ack(cmd::CMD_EXIT, &[]);
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            tracing::debug!(error = %error, "socket shutdown after exit failed");
        }
        result.map(|_| ())
    }
}

fn resolve(address: &DeviceAddress) -> Result<SocketAddr, DeviceError> {
    let mut addrs = (address.host.as_str(), address.port)
        .to_socket_addrs()
        .map_err(DeviceError::Resolve)?;
    addrs.next().ok_or_else(|| {
        DeviceError::Resolve(std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            "no socket address resolved for device endpoint",
        ))
    })
}
