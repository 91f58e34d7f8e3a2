//! Non-blocking TCP listener and client sockets.

use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

use shared::{Connection, LinkError, LinkResult, Listener, LISTEN_BACKLOG};
use tokio::net::TcpSocket;

use crate::error::{link_error, ServerError, ServerResult};

/// Passive socket handed to the relay
#[derive(Debug)]
pub struct TcpLineListener {
    inner: TcpListener,
}

impl TcpLineListener {
    /// Bind with a backlog of [`LISTEN_BACKLOG`] and switch to non-blocking mode.
    ///
    /// Must run inside a tokio runtime; the socket is handed back to std
    /// once listening.
    pub fn bind(addr: SocketAddr) -> ServerResult<Self> {
        let bind_error = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(bind_error)?;
        socket.set_reuseaddr(true).map_err(bind_error)?;
        socket.bind(addr).map_err(bind_error)?;

        let inner = socket
            .listen(LISTEN_BACKLOG)
            .and_then(|listener| listener.into_std())
            .map_err(bind_error)?;
        inner.set_nonblocking(true).map_err(bind_error)?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

impl Listener for TcpLineListener {
    type Connection = TcpConnection;

    fn accept(&mut self) -> LinkResult<Option<(TcpConnection, String)>> {
        let (stream, peer) = match self.inner.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                return match link_error(&e) {
                    LinkError::WouldBlock => Ok(None),
                    other => Err(other),
                }
            }
        };

        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("Could not make {} non-blocking: {}", peer, e);
            return Err(link_error(&e));
        }
        // Lines are small; don't let Nagle hold them back
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("set_nodelay failed for {}: {}", peer, e);
        }

        Ok(Some((TcpConnection { stream }, peer.to_string())))
    }
}

/// One accepted client socket
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
}

impl Connection for TcpConnection {
    fn read(&mut self, buf: &mut [u8]) -> LinkResult<usize> {
        self.stream.read(buf).map_err(|e| link_error(&e))
    }

    fn write(&mut self, data: &[u8]) -> LinkResult<usize> {
        self.stream.write(data).map_err(|e| link_error(&e))
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::thread;
    use std::time::Duration;

    fn loopback() -> TcpLineListener {
        TcpLineListener::bind(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))).unwrap()
    }

    fn accept_one(listener: &mut TcpLineListener) -> (TcpConnection, String) {
        for _ in 0..200 {
            if let Some(accepted) = listener.accept().unwrap() {
                return accepted;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("no connection accepted");
    }

    fn read_some(conn: &mut TcpConnection, buf: &mut [u8]) -> LinkResult<usize> {
        for _ in 0..200 {
            match conn.read(buf) {
                Err(LinkError::WouldBlock) => thread::sleep(Duration::from_millis(5)),
                other => return other,
            }
        }
        Err(LinkError::WouldBlock)
    }

    #[tokio::test]
    async fn test_accept_without_pending_returns_none() {
        let mut listener = loopback();
        assert!(listener.accept().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accept_read_write() {
        let mut listener = loopback();
        let addr = listener.local_addr().unwrap();
        let mut peer = TcpStream::connect(addr).unwrap();

        let (mut conn, identifier) = accept_one(&mut listener);
        assert_eq!(identifier, peer.local_addr().unwrap().to_string());

        // Nothing sent yet
        let mut buf = [0u8; 16];
        assert_eq!(conn.read(&mut buf), Err(LinkError::WouldBlock));

        peer.write_all(b"AT\r").unwrap();
        let n = read_some(&mut conn, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"AT\r");

        assert_eq!(conn.write(b"OK\r\n").unwrap(), 4);
        let mut reply = [0u8; 4];
        peer.read_exact(&mut reply).unwrap();
        assert_eq!(&reply, b"OK\r\n");
    }

    #[tokio::test]
    async fn test_backlog_holds_pending_connections() {
        let mut listener = loopback();
        let addr = listener.local_addr().unwrap();
        let peers: Vec<TcpStream> = (0..LISTEN_BACKLOG)
            .map(|_| TcpStream::connect(addr).unwrap())
            .collect();

        let mut names: Vec<String> = (0..peers.len())
            .map(|_| accept_one(&mut listener).1)
            .collect();
        let mut expected: Vec<String> = peers
            .iter()
            .map(|p| p.local_addr().unwrap().to_string())
            .collect();
        names.sort();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn test_peer_close_reads_zero() {
        let mut listener = loopback();
        let addr = listener.local_addr().unwrap();
        let peer = TcpStream::connect(addr).unwrap();
        let (mut conn, _) = accept_one(&mut listener);

        drop(peer);
        let mut buf = [0u8; 8];
        assert_eq!(read_some(&mut conn, &mut buf), Ok(0));
    }

    #[tokio::test]
    async fn test_shutdown_ends_peer_stream() {
        let mut listener = loopback();
        let addr = listener.local_addr().unwrap();
        let mut peer = TcpStream::connect(addr).unwrap();
        let (mut conn, _) = accept_one(&mut listener);

        conn.shutdown();
        let mut buf = [0u8; 8];
        assert_eq!(peer.read(&mut buf).unwrap(), 0);
    }
}
