#![forbid(unsafe_code)]

//! SOCKS5-UDP client support (tun2socks): wraps outbound datagrams in a
//! SOCKS5 `UDP ASSOCIATE` session.
//!
//! * [`udp_header`] — the bit-exact RFC 1928 §7 per-datagram header.
//! * [`relay::SocksUdpRelay`] — a per-session relay presenting a plain
//!   `PacketPassSink`/`PacketRecvSource` pair once the control-stream
//!   handshake has produced a relay socket and target address.
//! * [`handshake::SocksControlStream`] — the boundary contract for the
//!   handshake itself, out of scope per this crate's purpose.

pub mod handshake;
pub mod relay;
pub mod udp_header;

pub use handshake::SocksControlStream;
pub use relay::SocksUdpRelay;
pub use udp_header::MAX_OVERHEAD;
