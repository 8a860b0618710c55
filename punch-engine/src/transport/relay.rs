//! Radio bridge relays.
//!
//! A relay unit in the forest forwards raw station frames over the network.
//! The engine listens; the bridge connects (TCP) or sends datagrams (UDP).

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info};

use super::config::RelayProtocol;
use super::{Inbound, Transport, TransportError};

const READ_BUFFER: usize = 2048;

enum Socket {
    Tcp {
        listener: TcpListener,
        peer: Option<TcpStream>,
    },
    Udp {
        socket: UdpSocket,
        peer: Option<SocketAddr>,
    },
}

pub struct RelayTransport {
    listen: SocketAddr,
    protocol: RelayProtocol,
    socket: Option<Socket>,
}

impl RelayTransport {
    pub fn new(listen: SocketAddr, protocol: RelayProtocol) -> Self {
        Self {
            listen,
            protocol,
            socket: None,
        }
    }

    /// Address actually bound, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self.socket.as_ref()? {
            Socket::Tcp { listener, .. } => listener.local_addr().ok(),
            Socket::Udp { socket, .. } => socket.local_addr().ok(),
        }
    }
}

#[async_trait]
impl Transport for RelayTransport {
    fn describe(&self) -> String {
        let proto = match self.protocol {
            RelayProtocol::Tcp => "tcp",
            RelayProtocol::Udp => "udp",
        };
        format!("relay {proto}://{}", self.listen)
    }

    async fn open(&mut self) -> Result<(), TransportError> {
        // A lost bridge leaves the listener in place
        if self.socket.is_some() {
            return Ok(());
        }
        let address = self.listen.to_string();
        let socket = match self.protocol {
            RelayProtocol::Tcp => Socket::Tcp {
                listener: TcpListener::bind(self.listen)
                    .await
                    .map_err(|e| TransportError::from_open(&address, e))?,
                peer: None,
            },
            RelayProtocol::Udp => Socket::Udp {
                socket: UdpSocket::bind(self.listen)
                    .await
                    .map_err(|e| TransportError::from_open(&address, e))?,
                peer: None,
            },
        };
        self.socket = Some(socket);
        info!(relay = %self.describe(), "relay listening");
        Ok(())
    }

    async fn read_stream(&mut self) -> Result<Inbound, TransportError> {
        let mut buf = [0u8; READ_BUFFER];
        match self.socket.as_mut().ok_or(TransportError::NotOpen)? {
            Socket::Tcp { listener, peer } => {
                if peer.is_none() {
                    let (stream, from) = listener.accept().await?;
                    info!(%from, "relay bridge connected");
                    *peer = Some(stream);
                }
                let stream = peer.as_mut().ok_or(TransportError::NotOpen)?;
                let n = stream
                    .read(&mut buf)
                    .await
                    .map_err(|e| TransportError::lost(e.to_string()))?;
                if n == 0 {
                    *peer = None;
                    return Err(TransportError::lost("bridge disconnected"));
                }
                Ok(Inbound::Bytes(buf[..n].to_vec()))
            }
            Socket::Udp { socket, peer } => {
                let (n, from) = socket.recv_from(&mut buf).await?;
                if *peer != Some(from) {
                    debug!(%from, "relay datagram source");
                    *peer = Some(from);
                }
                Ok(Inbound::Bytes(buf[..n].to_vec()))
            }
        }
    }

    async fn write_command(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        match self.socket.as_mut().ok_or(TransportError::NotOpen)? {
            Socket::Tcp { peer, .. } => {
                let stream = peer.as_mut().ok_or(TransportError::NotOpen)?;
                stream
                    .write_all(bytes)
                    .await
                    .map_err(|e| TransportError::lost(e.to_string()))
            }
            Socket::Udp { socket, peer } => {
                let to = peer.ok_or(TransportError::NotOpen)?;
                socket.send_to(bytes, to).await?;
                Ok(())
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.socket = None;
        Ok(())
    }
}
