use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

const ATYP_IPV4: u8 = 1;
const ATYP_IPV6: u8 = 4;

/// `rsv(2) + frag(1) + atyp(1)`, present ahead of the address on every
/// datagram.
const FIXED_LEN: usize = 2 + 1 + 1;

const IPV4_ADDR_LEN: usize = 4 + 2;
const IPV6_ADDR_LEN: usize = 16 + 2;

/// Bytes reserved ahead of the payload for the largest address this header
/// can carry (IPv6), matching the original's `compute_socks_mtu`.
pub const MAX_OVERHEAD: usize = FIXED_LEN + IPV6_ADDR_LEN;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("SOCKS UDP header truncated: {0} bytes available")]
    Truncated(usize),
    #[error("SOCKS UDP header has a nonzero FRAG byte: {0} (fragmentation is unsupported)")]
    Fragmented(u8),
    #[error("SOCKS UDP header has an unsupported ATYP: {0} (only IPv4 and IPv6 are carried)")]
    UnsupportedAddressType(u8),
}

/// Appends the RFC 1928 §7 UDP header for `addr`, followed by `payload`, to
/// `out`.
pub fn encode(addr: SocketAddr, payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(FIXED_LEN + addr_len(addr) + payload.len());
    out.extend_from_slice(&0u16.to_be_bytes()); // rsv
    out.push(0); // frag
    match addr.ip() {
        IpAddr::V4(ip) => {
            out.push(ATYP_IPV4);
            out.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            out.push(ATYP_IPV6);
            out.extend_from_slice(&ip.octets());
        }
    }
    out.extend_from_slice(&addr.port().to_be_bytes());
    out.extend_from_slice(payload);
}

fn addr_len(addr: SocketAddr) -> usize {
    match addr {
        SocketAddr::V4(_) => IPV4_ADDR_LEN,
        SocketAddr::V6(_) => IPV6_ADDR_LEN,
    }
}

/// Parses the header prefix of `data`, returning the destination address
/// it carries along with the remaining datagram payload.
pub fn decode(data: &[u8]) -> Result<(SocketAddr, &[u8]), DecodeError> {
    if data.len() < FIXED_LEN {
        return Err(DecodeError::Truncated(data.len()));
    }
    let frag = data[2];
    if frag != 0 {
        return Err(DecodeError::Fragmented(frag));
    }
    let atyp = data[3];
    let rest = &data[FIXED_LEN..];
    match atyp {
        ATYP_IPV4 => {
            if rest.len() < IPV4_ADDR_LEN {
                return Err(DecodeError::Truncated(data.len()));
            }
            let ip = Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
            let port = u16::from_be_bytes([rest[4], rest[5]]);
            Ok((SocketAddr::new(IpAddr::V4(ip), port), &rest[IPV4_ADDR_LEN..]))
        }
        ATYP_IPV6 => {
            if rest.len() < IPV6_ADDR_LEN {
                return Err(DecodeError::Truncated(data.len()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&rest[..16]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([rest[16], rest[17]]);
            Ok((SocketAddr::new(IpAddr::V6(ip), port), &rest[IPV6_ADDR_LEN..]))
        }
        other => Err(DecodeError::UnsupportedAddressType(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_ipv4_header_bit_exact() {
        let mut out = Vec::new();
        let addr: SocketAddr = "192.0.2.1:53".parse().unwrap();
        encode(addr, b"Q", &mut out);
        assert_eq!(
            out,
            vec![0x00, 0x00, 0x00, ATYP_IPV4, 192, 0, 2, 1, 0x00, 0x35, b'Q']
        );
    }

    #[test]
    fn round_trips_ipv4_and_ipv6() {
        for addr in ["192.0.2.1:53", "[2001:db8::1]:443"] {
            let addr: SocketAddr = addr.parse().unwrap();
            let mut out = Vec::new();
            encode(addr, b"payload", &mut out);
            let (decoded_addr, payload) = decode(&out).expect("decode");
            assert_eq!(decoded_addr, addr);
            assert_eq!(payload, b"payload");
        }
    }

    #[test]
    fn rejects_fragmented_datagrams() {
        let data = [0x00, 0x00, 0x01, ATYP_IPV4, 1, 2, 3, 4, 0, 80];
        assert!(matches!(decode(&data), Err(DecodeError::Fragmented(1))));
    }

    #[test]
    fn rejects_domain_name_address_type() {
        let data = [0x00, 0x00, 0x00, 0x03, 0, 80];
        assert!(matches!(decode(&data), Err(DecodeError::UnsupportedAddressType(3))));
    }
}
