use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::adapters::device::{DeviceClient, DeviceConnector, DeviceError};
use crate::adapters::zk_protocol::{
    Packet, cmd, decode_frame_prefix, decode_packet, encode_packet, encode_time, make_comm_key,
};
use crate::domain::device_address::DeviceAddress;
use crate::domain::models::{RawPunch, UserRecord};

const SERVER_READ_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// In-memory device

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeStep {
    Connect,
    GetUsers,
    GetAttendance,
    DisableDevice,
    EnableDevice,
    Disconnect,
}

impl FakeStep {
    fn name(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::GetUsers => "get_users",
            Self::GetAttendance => "get_attendance",
            Self::DisableDevice => "disable_device",
            Self::EnableDevice => "enable_device",
            Self::Disconnect => "disconnect",
        }
    }
}

/// Connector handing out clients that serve canned data and record every call.
#[derive(Debug, Clone, Default)]
pub struct FakeDevice {
    users: Vec<UserRecord>,
    punches: Vec<RawPunch>,
    failures: Vec<FakeStep>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeDevice {
    pub fn with_data(users: Vec<UserRecord>, punches: Vec<RawPunch>) -> Self {
        Self {
            users,
            punches,
            ..Self::default()
        }
    }

    pub fn failing(mut self, step: FakeStep) -> Self {
        self.failures.push(step);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn step(&self, step: FakeStep) -> Result<(), DeviceError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push(step.name().to_string());
        if self.failures.contains(&step) {
            return Err(DeviceError::Scripted(step.name().to_string()));
        }
        Ok(())
    }
}

struct FakeClient {
    device: FakeDevice,
}

impl DeviceClient for FakeClient {
    fn get_users(&mut self) -> Result<Vec<UserRecord>, DeviceError> {
        self.device.step(FakeStep::GetUsers)?;
        Ok(self.device.users.clone())
    }

    fn get_attendance(&mut self) -> Result<Vec<RawPunch>, DeviceError> {
        self.device.step(FakeStep::GetAttendance)?;
        Ok(self.device.punches.clone())
    }

    fn disable_device(&mut self) -> Result<(), DeviceError> {
        self.device.step(FakeStep::DisableDevice)
    }

    fn enable_device(&mut self) -> Result<(), DeviceError> {
        self.device.step(FakeStep::EnableDevice)
    }

    fn disconnect(&mut self) -> Result<(), DeviceError> {
        self.device.step(FakeStep::Disconnect)
    }
}

impl DeviceConnector for FakeDevice {
    fn connect(
        &self,
        _address: &DeviceAddress,
        _timeout: Duration,
    ) -> Result<Box<dyn DeviceClient>, DeviceError> {
        self.step(FakeStep::Connect)?;
        Ok(Box::new(FakeClient {
            device: self.clone(),
        }))
    }
}

pub fn sample_user(user_id: &str, name: &str) -> UserRecord {
    UserRecord {
        uid: user_id.parse().unwrap_or(0),
        user_id: user_id.to_string(),
        name: name.to_string(),
        privilege: 0,
        password: String::new(),
        group_id: "1".to_string(),
    }
}

pub fn sample_punch(user_id: &str, timestamp: &str, punch_code: u8) -> RawPunch {
    RawPunch {
        user_id: user_id.to_string(),
        timestamp: NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .expect("timestamp parses"),
        punch_code,
        verify_state: 1,
    }
}

// ---------------------------------------------------------------------------
// Device wire records

pub fn table(records: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = records.iter().map(Vec::len).sum();
    let mut buffer = (total as u32).to_le_bytes().to_vec();
    for record in records {
        buffer.extend_from_slice(record);
    }
    buffer
}

pub fn user_record_72(uid: u16, user_id: &str, name: &str, privilege: u8) -> Vec<u8> {
    let mut record = vec![0_u8; 72];
    record[0..2].copy_from_slice(&uid.to_le_bytes());
    record[2] = privilege;
    record[11..11 + name.len()].copy_from_slice(name.as_bytes());
    record[40] = b'1';
    record[48..48 + user_id.len()].copy_from_slice(user_id.as_bytes());
    record
}

pub fn user_record_28(uid: u16, user_id: u32, name: &str) -> Vec<u8> {
    let mut record = vec![0_u8; 28];
    record[0..2].copy_from_slice(&uid.to_le_bytes());
    record[8..8 + name.len()].copy_from_slice(name.as_bytes());
    record[21] = 1;
    record[24..28].copy_from_slice(&user_id.to_le_bytes());
    record
}

pub fn attendance_record_8(uid: u16, timestamp: &NaiveDateTime, punch_code: u8) -> Vec<u8> {
    let mut record = vec![0_u8; 8];
    record[0..2].copy_from_slice(&uid.to_le_bytes());
    record[2] = 1;
    record[3..7].copy_from_slice(&encode_time(timestamp).to_le_bytes());
    record[7] = punch_code;
    record
}

pub fn attendance_record_40(user_id: &str, timestamp: &NaiveDateTime, punch_code: u8) -> Vec<u8> {
    let mut record = vec![0_u8; 40];
    record[2..2 + user_id.len()].copy_from_slice(user_id.as_bytes());
    record[26] = 1;
    record[27..31].copy_from_slice(&encode_time(timestamp).to_le_bytes());
    record[31] = punch_code;
    record
}

// ---------------------------------------------------------------------------
// Fake ZKTeco terminal on a local TCP socket

#[derive(Debug, Clone, Default)]
pub struct FakeZkServerConfig {
    pub users: Vec<Vec<u8>>,
    pub attendance: Vec<Vec<u8>>,
    /// Announce table sizes and serve them through chunk requests.
    pub chunked: bool,
    /// Push a real-time event packet before answering size queries.
    pub emit_event: bool,
    pub comm_key: Option<u32>,
}

/// Serves one client connection and returns the command ids it received.
pub struct FakeZkServer {
    port: u16,
    handle: JoinHandle<Vec<u16>>,
}

impl FakeZkServer {
    pub fn start(config: FakeZkServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("fake device should bind");
        let port = listener.local_addr().expect("addr should be available").port();

        let handle = thread::spawn(move || {
            let Ok((stream, _)) = listener.accept() else {
                return Vec::new();
            };
            stream
                .set_read_timeout(Some(SERVER_READ_TIMEOUT))
                .expect("read timeout should be configurable");
            serve_device(stream, &config)
        });

        Self { port, handle }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn finish(self) -> Vec<u16> {
        self.handle
            .join()
            .expect("fake device thread should terminate cleanly")
    }
}

const FAKE_SESSION_ID: u16 = 0x2a2a;

fn serve_device(mut stream: TcpStream, config: &FakeZkServerConfig) -> Vec<u16> {
    let mut commands = Vec::new();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(packet) = read_frame(&mut stream) {
        commands.push(packet.command);
        let reply_id = packet.reply_id;
        let mut send = |command: u16, data: &[u8]| {
            stream
                .write_all(&encode_packet(command, FAKE_SESSION_ID, reply_id, data))
                .expect("fake device write should succeed");
        };

        match packet.command {
            cmd::CMD_CONNECT => {
                if config.comm_key.is_some() {
                    send(cmd::CMD_ACK_UNAUTH, &[]);
                } else {
                    send(cmd::CMD_ACK_OK, &[]);
                }
            }
            cmd::CMD_AUTH => {
                let accepted = config
                    .comm_key
                    .is_some_and(|key| make_comm_key(key, FAKE_SESSION_ID)[..] == packet.data[..]);
                send(
                    if accepted {
                        cmd::CMD_ACK_OK
                    } else {
                        cmd::CMD_ACK_UNAUTH
                    },
                    &[],
                );
            }
            cmd::CMD_GET_FREE_SIZES => {
                if config.emit_event {
                    send(cmd::CMD_REG_EVENT, &[1, 0, 0, 0]);
                }
                let mut data = vec![0_u8; 80];
                data[16..20].copy_from_slice(&(config.users.len() as u32).to_le_bytes());
                data[32..36].copy_from_slice(&(config.attendance.len() as u32).to_le_bytes());
                send(cmd::CMD_ACK_OK, &data);
            }
            cmd::CMD_DATA_WRRQ => {
                let table_command = u16::from_le_bytes([packet.data[1], packet.data[2]]);
                let records = if table_command == cmd::CMD_USERTEMP_RRQ {
                    &config.users
                } else {
                    &config.attendance
                };
                let buffer = table(records);
                if config.chunked {
                    let mut data = vec![0_u8];
                    data.extend_from_slice(&(buffer.len() as u32).to_le_bytes());
                    data.extend_from_slice(&[0, 0, 0, 0]);
                    pending = buffer;
                    send(cmd::CMD_ACK_OK, &data);
                } else {
                    send(cmd::CMD_DATA, &buffer);
                }
            }
            cmd::CMD_DATA_RDY => {
                let start = u32::from_le_bytes([
                    packet.data[0],
                    packet.data[1],
                    packet.data[2],
                    packet.data[3],
                ]) as usize;
                let size = u32::from_le_bytes([
                    packet.data[4],
                    packet.data[5],
                    packet.data[6],
                    packet.data[7],
                ]) as usize;
                let end = (start + size).min(pending.len());
                let slice = pending[start.min(end)..end].to_vec();

                send(cmd::CMD_PREPARE_DATA, &(slice.len() as u32).to_le_bytes());
                for piece in slice.chunks(50) {
                    send(cmd::CMD_DATA, piece);
                }
                send(cmd::CMD_ACK_OK, &[]);
            }
            cmd::CMD_EXIT => {
                send(cmd::CMD_ACK_OK, &[]);
                break;
            }
            _ => send(cmd::CMD_ACK_OK, &[]),
        }
    }

    commands
}

fn read_frame(stream: &mut TcpStream) -> Option<Packet> {
    let mut prefix = [0_u8; 8];
    stream.read_exact(&mut prefix).ok()?;
    let length = decode_frame_prefix(&prefix).ok()?;
    let mut payload = vec![0_u8; length];
    stream.read_exact(&mut payload).ok()?;
    decode_packet(&payload).ok()
}

// ---------------------------------------------------------------------------
// Fake upload backend

#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Minimal HTTP/1.1 responder answering a single request with a canned reply.
pub struct FakeBackend {
    port: u16,
    handle: JoinHandle<Option<CapturedRequest>>,
}

impl FakeBackend {
    pub fn start(status: u16, body: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("fake backend should bind");
        let port = listener.local_addr().expect("addr should be available").port();

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().ok()?;
            stream.set_read_timeout(Some(SERVER_READ_TIMEOUT)).ok()?;
            let request = read_http_request(&mut stream)?;

            let response = format!(
                "HTTP/1.1 {status} Fake\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).ok()?;
            stream.flush().ok()?;
            Some(request)
        });

        Self { port, handle }
    }

    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/attendance/upload", self.port)
    }

    pub fn finish(self) -> CapturedRequest {
        self.handle
            .join()
            .expect("fake backend thread should terminate cleanly")
            .expect("fake backend should capture a request")
    }
}

/// URL of a local port nothing listens on.
pub fn unreachable_url() -> String {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        listener.local_addr().expect("addr should be available").port()
    };
    format!("http://127.0.0.1:{port}/attendance/upload")
}

fn read_http_request(stream: &mut TcpStream) -> Option<CapturedRequest> {
    let mut raw = Vec::new();
    let mut buffer = [0_u8; 4096];

    let header_end = loop {
        let size = stream.read(&mut buffer).ok()?;
        if size == 0 {
            return None;
        }
        raw.extend_from_slice(&buffer[..size]);
        if let Some(position) = raw.windows(4).position(|window| window == b"\r\n\r\n") {
            break position + 4;
        }
    };

    let head = String::from_utf8_lossy(&raw[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let headers: HashMap<String, String> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);

    while raw.len() < header_end + content_length {
        let size = stream.read(&mut buffer).ok()?;
        if size == 0 {
            break;
        }
        raw.extend_from_slice(&buffer[..size]);
    }

    let body_end = (header_end + content_length).min(raw.len());
    Some(CapturedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&raw[header_end..body_end]).to_string(),
    })
}
