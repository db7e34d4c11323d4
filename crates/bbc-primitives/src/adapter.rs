use std::fmt;
use std::ops::{Deref, DerefMut};

use bitcoin::consensus::{Decodable, Encodable};

/// A thin wrapper that lets any `bitcoin` consensus-encodable type be stored
/// as a plain byte blob (in `sled`, or anywhere else that wants raw bytes)
/// without re-deriving its wire format by hand.
///
/// This plays the same role the teacher's `Adapter<T>` played bridging
/// `bitcoin` crate types into a schema-driven storage layer; here the target
/// is a byte-oriented KV store instead of a schema-driven one; the bridging
/// idea (encode through `bitcoin::consensus`, don't reinvent it) is kept.
#[derive(Clone, PartialEq, Eq)]
pub struct Adapter<T> {
    inner: T,
}

impl<T> Adapter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: Encodable> Adapter<T> {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.inner
            .consensus_encode(&mut buf)
            .expect("encoding to a Vec never fails");
        buf
    }
}

impl<T: Decodable> Adapter<T> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bitcoin::consensus::encode::Error> {
        let inner = T::consensus_decode(&mut &bytes[..])?;
        Ok(Self { inner })
    }
}

impl<T> From<T> for Adapter<T> {
    fn from(inner: T) -> Self {
        Self::new(inner)
    }
}

impl<T> Deref for Adapter<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> DerefMut for Adapter<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for Adapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hashes::Hash;
    use bitcoin::{OutPoint, Txid};

    #[test]
    fn round_trips_through_bytes() {
        let outpoint = OutPoint::new(Txid::from_byte_array([7u8; 32]), 3);
        let adapter = Adapter::new(outpoint);
        let bytes = adapter.to_bytes();
        let back = Adapter::<OutPoint>::from_bytes(&bytes).unwrap();
        assert_eq!(*back, outpoint);
    }
}
