use badvpn_pipeline::capability::{StreamPassSink, StreamRecvSource};

/// The SOCKS5 client control-stream handshake (method negotiation,
/// `UDP ASSOCIATE` request/reply) is out of scope here: it's a boundary
/// contract, not a reimplementation. Anything that can drive that exchange
/// over a byte stream and hand back the relay's `BND.ADDR` implements this;
/// [`crate::relay::SocksUdpRelay`] only needs the address the handshake
/// produced, not the handshake itself.
///
/// Grounded on `original_source/socksclient/BSocksClient.c`, whose state
/// machine this trait deliberately does not carry over.
pub trait SocksControlStream: StreamPassSink + StreamRecvSource {}

impl<T: StreamPassSink + StreamRecvSource> SocksControlStream for T {}
