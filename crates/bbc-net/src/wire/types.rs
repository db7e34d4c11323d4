use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use bitcoin::consensus::encode::{self, Decodable, Encodable, VarInt};

bitflags::bitflags! {
    /// The `services` bitfield advertised in `version`/`addr` (BIP111 and
    /// friends). Only the bits this core cares about are named; unknown
    /// bits round-trip through `bits()` unchanged.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ServiceFlags: u64 {
        const NETWORK       = 1 << 0;
        const BLOOM         = 1 << 2;
        const WITNESS       = 1 << 3;
        const NETWORK_LIMITED = 1 << 10;
    }
}

pub type Nonce = u64;

/// A single network address as carried in `version` (no timestamp) and
/// `addr` (with timestamp) messages. IPv4 addresses are represented as
/// IPv4-mapped IPv6 per the wire format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NetAddr {
    pub services: ServiceFlags,
    pub addr: SocketAddr,
}

impl NetAddr {
    fn ip_bytes(&self) -> [u8; 16] {
        match self.addr.ip() {
            IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
            IpAddr::V6(v6) => v6.octets(),
        }
    }

    fn from_ip_bytes(bytes: [u8; 16], port: u16) -> SocketAddr {
        let v6 = Ipv6Addr::from(bytes);
        match v6.to_ipv4_mapped() {
            Some(v4) => SocketAddr::new(IpAddr::V4(v4), port),
            None => SocketAddr::new(IpAddr::V6(v6), port),
        }
    }
}

impl Encodable for NetAddr {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.services.bits().consensus_encode(w)?;
        w.write_all(&self.ip_bytes())?;
        len += 16;
        w.write_all(&self.addr.port().to_be_bytes())?;
        len += 2;
        Ok(len)
    }
}

impl Decodable for NetAddr {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        let services = ServiceFlags::from_bits_retain(u64::consensus_decode(r)?);
        let mut ip = [0u8; 16];
        r.read_exact(&mut ip)?;
        let mut port_bytes = [0u8; 2];
        r.read_exact(&mut port_bytes)?;
        let port = u16::from_be_bytes(port_bytes);
        Ok(NetAddr {
            services,
            addr: NetAddr::from_ip_bytes(ip, port),
        })
    }
}

/// An `addr` entry: a timestamp (seconds since epoch) plus a `NetAddr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimestampedAddr {
    pub time: u32,
    pub addr: NetAddr,
}

impl Encodable for TimestampedAddr {
    fn consensus_encode<W: io::Write + ?Sized>(&self, w: &mut W) -> Result<usize, io::Error> {
        let mut len = self.time.consensus_encode(w)?;
        len += self.addr.consensus_encode(w)?;
        Ok(len)
    }
}

impl Decodable for TimestampedAddr {
    fn consensus_decode<R: io::Read + ?Sized>(r: &mut R) -> Result<Self, encode::Error> {
        Ok(TimestampedAddr {
            time: Decodable::consensus_decode(r)?,
            addr: Decodable::consensus_decode(r)?,
        })
    }
}

pub(crate) fn encode_vec<T: Encodable, W: io::Write + ?Sized>(items: &[T], w: &mut W) -> Result<usize, io::Error> {
    let mut len = VarInt(items.len() as u64).consensus_encode(w)?;
    for item in items {
        len += item.consensus_encode(w)?;
    }
    Ok(len)
}

pub(crate) fn decode_vec<T: Decodable, R: io::Read + ?Sized>(r: &mut R, max: u64) -> Result<Vec<T>, encode::Error> {
    let count = VarInt::consensus_decode(r)?.0.min(max);
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(T::consensus_decode(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ipv4_net_addr_round_trips() {
        let addr = NetAddr {
            services: ServiceFlags::NETWORK | ServiceFlags::WITNESS,
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), 8333),
        };
        let mut bytes = Vec::new();
        addr.consensus_encode(&mut bytes).unwrap();
        let back = NetAddr::consensus_decode(&mut &bytes[..]).unwrap();
        assert_eq!(addr, back);
    }
}
