//! `Socket`/`SocketPool` from the source's socket.cpp: a thin wrapper over
//! std TCP/UDP sockets that busy-loops writes and reads to completion,
//! retrying on `WouldBlock` rather than surfacing a short write/read to the
//! caller. UDP fragments into `UDP_MAX_BYTES`-sized datagrams; TCP streams
//! the whole buffer through `std::net`.
//!
//! Unlike the source, failures here return `EngineError::Io` instead of
//! printing and calling `exit` — this crate's process boundary is a library,
//! not a standalone binary, so the decision to abort belongs to the caller.

use std::io::{ErrorKind, Read as _, Write as _};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::Mutex;

use crate::error::{EngineError, EngineResult};
use crate::rpc::Stats;

const HELLO_BYTE: u8 = 0x18;
const UDP_MAX_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Tcp,
    Udp,
}

/// One connected endpoint, either side of a HELLO/CREATE_FRAGMENT/etc.
/// exchange. Owns its accounting so a `SocketPool` can report aggregate
/// stats without locking every socket at once.
pub enum Socket {
    Tcp(TcpStream),
    Udp { socket: UdpSocket, peer: SocketAddr },
}

impl Socket {
    pub fn connect(kind: SocketType, addr: SocketAddr) -> EngineResult<Self> {
        match kind {
            SocketType::Tcp => {
                let stream = TcpStream::connect(addr)?;
                Ok(Socket::Tcp(stream))
            }
            SocketType::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0")?;
                socket.connect(addr)?;
                socket.send(&[HELLO_BYTE])?;
                Ok(Socket::Udp { socket, peer: addr })
            }
        }
    }

    /// Block until a client connects to `port` (TCP accept, or the UDP
    /// handshake byte arrives) and return the resulting endpoint.
    pub fn accept(kind: SocketType, port: u16) -> EngineResult<Self> {
        let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
        match kind {
            SocketType::Tcp => {
                let listener = TcpListener::bind(bind_addr)?;
                log::info!("listening on TCP 0.0.0.0:{port}");
                let (stream, peer) = listener.accept()?;
                log::info!("client connected from {peer}");
                Ok(Socket::Tcp(stream))
            }
            SocketType::Udp => {
                let socket = UdpSocket::bind(bind_addr)?;
                log::info!("listening on UDP 0.0.0.0:{port}");
                let mut hello = [0u8; 1];
                let (_, peer) = socket.recv_from(&mut hello)?;
                if hello[0] != HELLO_BYTE {
                    return Err(EngineError::Protocol { detail: "invalid UDP hello byte".into() });
                }
                socket.connect(peer)?;
                log::info!("client connected from {peer}");
                Ok(Socket::Udp { socket, peer })
            }
        }
    }

    /// Non-blocking sockets plus `TCP_NODELAY`; has no effect on UDP, which
    /// is already unbuffered.
    pub fn enable_turbo(&mut self) -> EngineResult<()> {
        if let Socket::Tcp(stream) = self {
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
        }
        Ok(())
    }

    pub fn write(&mut self, data: &[u8]) -> EngineResult<()> {
        match self {
            Socket::Tcp(stream) => write_tcp_busy(stream, data),
            Socket::Udp { socket, .. } => write_udp_busy(socket, data),
        }
    }

    pub fn read(&mut self, data: &mut [u8]) -> EngineResult<()> {
        match self {
            Socket::Tcp(stream) => read_tcp_busy(stream, data),
            Socket::Udp { socket, .. } => read_udp_busy(socket, data),
        }
    }
}

fn write_tcp_busy(stream: &mut TcpStream, mut data: &[u8]) -> EngineResult<()> {
    while !data.is_empty() {
        match stream.write(data) {
            Ok(0) => return Err(EngineError::Io(std::io::Error::from(ErrorKind::WriteZero))),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn read_tcp_busy(stream: &mut TcpStream, mut data: &mut [u8]) -> EngineResult<()> {
    while !data.is_empty() {
        match stream.read(data) {
            Ok(0) => return Err(EngineError::Io(std::io::Error::from(ErrorKind::UnexpectedEof))),
            Ok(n) => data = &mut data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn write_udp_busy(socket: &UdpSocket, mut data: &[u8]) -> EngineResult<()> {
    while !data.is_empty() {
        let chunk_len = data.len().min(UDP_MAX_BYTES);
        match socket.send(&data[..chunk_len]) {
            Ok(0) => return Err(EngineError::Io(std::io::Error::from(ErrorKind::WriteZero))),
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn read_udp_busy(socket: &UdpSocket, mut data: &mut [u8]) -> EngineResult<()> {
    while !data.is_empty() {
        let chunk_len = data.len().min(UDP_MAX_BYTES);
        match socket.recv(&mut data[..chunk_len]) {
            Ok(0) => return Err(EngineError::Io(std::io::Error::from(ErrorKind::UnexpectedEof))),
            Ok(n) => data = &mut data[n..],
            Err(e) if e.kind() == ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Multiple connected endpoints fanned out from the root process, one per
/// worker slice. Each socket gets its own mutex so concurrent callers can
/// address disjoint slices without serializing on the whole pool.
pub struct SocketPool {
    sockets: Vec<Mutex<Socket>>,
    sent_bytes: Mutex<u64>,
    recv_bytes: Mutex<u64>,
}

impl SocketPool {
    pub fn connect(kind: SocketType, addrs: &[SocketAddr]) -> EngineResult<Self> {
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            sockets.push(Mutex::new(Socket::connect(kind, *addr)?));
        }
        Ok(Self { sockets, sent_bytes: Mutex::new(0), recv_bytes: Mutex::new(0) })
    }

    pub fn n_sockets(&self) -> usize {
        self.sockets.len()
    }

    pub fn enable_turbo(&self) -> EngineResult<()> {
        for slot in &self.sockets {
            slot.lock().expect("socket mutex poisoned").enable_turbo()?;
        }
        Ok(())
    }

    pub fn write(&self, socket_index: usize, data: &[u8]) -> EngineResult<()> {
        let mut socket = self.sockets[socket_index].lock().expect("socket mutex poisoned");
        socket.write(data)?;
        *self.sent_bytes.lock().expect("stats mutex poisoned") += data.len() as u64;
        Ok(())
    }

    pub fn read(&self, socket_index: usize, data: &mut [u8]) -> EngineResult<()> {
        let mut socket = self.sockets[socket_index].lock().expect("socket mutex poisoned");
        socket.read(data)?;
        *self.recv_bytes.lock().expect("stats mutex poisoned") += data.len() as u64;
        Ok(())
    }

    /// Sample and reset the cumulative byte counters, matching
    /// `SocketPool::getStats`'s read-and-clear semantics.
    pub fn get_stats(&self) -> Stats {
        let mut sent = self.sent_bytes.lock().expect("stats mutex poisoned");
        let mut recv = self.recv_bytes.lock().expect("stats mutex poisoned");
        let stats = Stats { sent_bytes: *sent, recv_bytes: *recv };
        *sent = 0;
        *recv = 0;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn tcp_round_trip_through_busy_loops() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = Socket::Tcp(stream);
            let mut buf = [0u8; 5];
            socket.read(&mut buf).unwrap();
            socket.write(&buf).unwrap();
        });

        let mut client = Socket::connect(SocketType::Tcp, addr).unwrap();
        client.write(b"hello").unwrap();
        let mut echoed = [0u8; 5];
        client.read(&mut echoed).unwrap();
        assert_eq!(&echoed, b"hello");

        server.join().unwrap();
    }

    #[test]
    fn socket_pool_accumulates_and_resets_stats() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut socket = Socket::Tcp(stream);
            let mut buf = [0u8; 3];
            socket.read(&mut buf).unwrap();
        });

        let pool = SocketPool::connect(SocketType::Tcp, &[addr]).unwrap();
        pool.write(0, b"abc").unwrap();
        server.join().unwrap();

        let stats = pool.get_stats();
        assert_eq!(stats.sent_bytes, 3);
        assert_eq!(stats.recv_bytes, 0);

        let stats_again = pool.get_stats();
        assert_eq!(stats_again.sent_bytes, 0);
    }
}
