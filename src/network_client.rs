//! Blocking transport used for the KDC round trips of the Kerberos handshake.

use std::fmt::Debug;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use byteorder::{BigEndian, ReadBytesExt};
use url::Url;

use crate::{Error, ErrorKind, Result};

pub const KDC_DEFAULT_PORT: u16 = 88;

// Bound for a KDC reply announced by the peer before the buffer is allocated.
const MAX_KDC_REPLY_LEN: u32 = 0x10_0000;

// 48 000 bytes: default maximum token len in Windows
const UDP_RECV_BUFFER_LEN: usize = 0xbb80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkProtocol {
    Tcp,
    Udp,
}

impl NetworkProtocol {
    pub(crate) fn from_url_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "tcp" | "krb5" => Some(Self::Tcp),
            "udp" => Some(Self::Udp),
            _ => None,
        }
    }
}

/// A single KDC exchange. `data` is the bare Kerberos message; framing is the client's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRequest {
    pub protocol: NetworkProtocol,
    pub url: Url,
    pub data: Vec<u8>,
}

impl NetworkRequest {
    pub fn new(url: Url, data: Vec<u8>) -> Result<Self> {
        let protocol = NetworkProtocol::from_url_scheme(url.scheme()).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidParameter,
                format!("unsupported KDC URL scheme: {}", url.scheme()),
            )
        })?;

        Ok(Self { protocol, url, data })
    }
}

pub trait NetworkClient: Debug + Send + Sync {
    /// Sends the request and returns the bare Kerberos reply.
    fn send(&self, request: &NetworkRequest) -> Result<Vec<u8>>;

    fn box_clone(&self) -> Box<dyn NetworkClient>;
}

impl Clone for Box<dyn NetworkClient> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// `std::net` client bounded by a per-operation timeout.
#[derive(Debug, Clone)]
pub struct StdNetworkClient {
    pub timeout: Duration,
}

impl Default for StdNetworkClient {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

fn unreachable_kdc(err: impl Debug) -> Error {
    Error::new(ErrorKind::Failure, format!("KDC is unreachable: {:?}", err))
}

fn socket_addr(url: &Url) -> Result<std::net::SocketAddr> {
    let host = url
        .host_str()
        .ok_or_else(|| Error::new(ErrorKind::InvalidParameter, "KDC URL has no host"))?;

    (host, url.port().unwrap_or(KDC_DEFAULT_PORT))
        .to_socket_addrs()
        .map_err(unreachable_kdc)?
        .next()
        .ok_or_else(|| Error::new(ErrorKind::Failure, format!("cannot resolve KDC host {}", host)))
}

impl StdNetworkClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn send_tcp(&self, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
        let mut stream = TcpStream::connect_timeout(&socket_addr(url)?, self.timeout).map_err(unreachable_kdc)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut framed = Vec::with_capacity(data.len() + 4);
        framed.extend_from_slice(&(data.len() as u32).to_be_bytes());
        framed.extend_from_slice(data);
        stream.write_all(&framed).map_err(unreachable_kdc)?;

        let len = stream.read_u32::<BigEndian>().map_err(unreachable_kdc)?;
        if len > MAX_KDC_REPLY_LEN {
            return Err(Error::new(
                ErrorKind::DefectiveToken,
                format!("KDC reply length {} exceeds the limit", len),
            ));
        }

        let mut reply = vec![0; len as usize];
        stream.read_exact(&mut reply).map_err(unreachable_kdc)?;

        Ok(reply)
    }

    fn send_udp(&self, url: &Url, data: &[u8]) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.send_to(data, socket_addr(url)?).map_err(unreachable_kdc)?;

        let mut buf = vec![0; UDP_RECV_BUFFER_LEN];
        let n = socket.recv(&mut buf).map_err(unreachable_kdc)?;
        buf.truncate(n);

        Ok(buf)
    }
}

impl NetworkClient for StdNetworkClient {
    fn send(&self, request: &NetworkRequest) -> Result<Vec<u8>> {
        debug!(url = %request.url, protocol = ?request.protocol, len = request.data.len(), "sending KDC request");

        match request.protocol {
            NetworkProtocol::Tcp => self.send_tcp(&request.url, &request.data),
            NetworkProtocol::Udp => self.send_udp(&request.url, &request.data),
        }
    }

    fn box_clone(&self) -> Box<dyn NetworkClient> {
        Box::new(self.clone())
    }
}
