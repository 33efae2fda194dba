#![forbid(unsafe_code)]

//! Peer-facing transport layer: the collaborators that sit between
//! SPProto/FragmentProto and the socket.
//!
//! * [`datagram_peer_io::DatagramPeerIo`] — UDP, either connected to a fixed
//!   peer or bound in learn-the-peer-from-the-first-datagram server mode.
//! * [`stream_peer_io::StreamPeerIo`] — password-then-PacketProto framing
//!   over any `StreamPassSink + StreamRecvSource` transport (TCP or TLS).
//! * [`tcp_transport::TcpTransport`] — the concrete plain-TCP implementer of
//!   that transport contract.
//! * [`password_listener::PasswordListener`] — accepts TCP connections on a
//!   single port and demultiplexes them by an 8-byte password to whichever
//!   handler registered for it.

pub mod datagram_peer_io;
pub mod packet_proto;
pub mod password_listener;
pub mod stream_peer_io;
pub mod tcp_transport;

pub use datagram_peer_io::{DatagramPeerIo, MAX_SPPROTO_OVERHEAD};
pub use password_listener::PasswordListener;
pub use stream_peer_io::StreamPeerIo;
pub use tcp_transport::TcpTransport;
