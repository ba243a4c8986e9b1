//! UDP transport channel
//!
//! Carries link frames as UDP datagrams exchanged with a multicast group on
//! one device. Used where raw capture is unavailable and by loopback tests.

use crate::transport::{Direction, SendStatus, Transport, TransportError, TransportFactory};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{ErrorKind, Read};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

/// Frames carried as UDP datagrams to a multicast group on one device
///
/// Wraps a non-blocking UDP socket bound to the device.
pub struct UdpTransport {
    name: String,
    inner: Option<Socket>,
    group: SocketAddrV4,
    scratch: Vec<u8>,
}

impl UdpTransport {
    /// Open a channel on `device` exchanging frames with `group`
    pub fn open(device: &str, group: SocketAddrV4) -> Result<Self, TransportError> {
        if device.is_empty() {
            return Err(TransportError::InvalidDevice(device.to_string()));
        }

        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        bind_to_device(&socket, device)?;

        let local = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, group.port());
        socket.bind(&SocketAddr::V4(local).into())?;

        if group.ip().is_multicast() {
            socket.join_multicast_v4(group.ip(), &Ipv4Addr::UNSPECIFIED)?;
            socket.set_multicast_loop_v4(false)?;
        }

        socket.set_nonblocking(true)?;

        tracing::debug!(device, %group, "udp transport opened");
        Ok(UdpTransport {
            name: device.to_string(),
            inner: Some(socket),
            group,
            scratch: Vec::new(),
        })
    }

    /// Set the send buffer size
    pub fn set_send_buffer_size(&self, size: usize) -> Result<(), TransportError> {
        self.socket()?.set_send_buffer_size(size)?;
        Ok(())
    }

    /// Set the receive buffer size
    pub fn set_recv_buffer_size(&self, size: usize) -> Result<(), TransportError> {
        self.socket()?.set_recv_buffer_size(size)?;
        Ok(())
    }

    fn socket(&self) -> Result<&Socket, TransportError> {
        self.inner.as_ref().ok_or(TransportError::Closed)
    }

    fn send(&self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        let target = SocketAddr::V4(self.group);
        match self.socket()?.send_to(frame, &target.into()) {
            Ok(n) => Ok(SendStatus::Accepted(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(SendStatus::WouldBlock),
            Err(e) => Err(TransportError::Io(e)),
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "fuchsia"))]
fn bind_to_device(socket: &Socket, device: &str) -> Result<(), TransportError> {
    socket.bind_device(Some(device.as_bytes()))?;
    Ok(())
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "fuchsia")))]
fn bind_to_device(_socket: &Socket, device: &str) -> Result<(), TransportError> {
    tracing::warn!(device, "device binding unsupported; using default route");
    Ok(())
}

impl Transport for UdpTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<Option<(usize, Direction)>, TransportError> {
        let mut socket = self.socket()?;
        match socket.read(buf) {
            Ok(n) => Ok(Some((n, Direction::Inbound))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn forward(&mut self, frame: &[u8]) -> Result<SendStatus, TransportError> {
        self.send(frame)
    }

    fn forward_with_source(
        &mut self,
        frame: &[u8],
        source: [u8; 6],
    ) -> Result<SendStatus, TransportError> {
        if frame.len() < 12 {
            return self.send(frame);
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.clear();
        scratch.extend_from_slice(frame);
        scratch[6..12].copy_from_slice(&source);
        let status = self.send(&scratch);
        self.scratch = scratch;
        status
    }

    fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(device = %self.name, "udp transport closed");
        }
    }
}

/// Opens [`UdpTransport`]s towards one multicast group
#[derive(Debug, Clone, Copy)]
pub struct UdpTransportFactory {
    group: SocketAddrV4,
}

impl UdpTransportFactory {
    /// Create a factory for `group`
    pub fn new(group: SocketAddrV4) -> Self {
        UdpTransportFactory { group }
    }
}

impl TransportFactory for UdpTransportFactory {
    fn open(&mut self, device: &str) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(UdpTransport::open(device, self.group)?))
    }
}
