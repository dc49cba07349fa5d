use bitvec::{order::Msb0, vec::BitVec};

// Wire order: piece 0 is the high bit of the first byte.
type Bits = BitVec<u8, Msb0>;

/// Fixed-length set of piece flags.
///
/// The length is chosen at construction and never changes. Flags are only
/// ever set; a replica is refreshed by replacing it wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitfield {
    bits: Bits,
}

impl Bitfield {

    pub fn new(num_pieces: usize) -> Self {
        Self { bits: Bits::repeat(false, num_pieces) }
    }

    pub fn full(num_pieces: usize) -> Self {
        Self { bits: Bits::repeat(true, num_pieces) }
    }

    /// Builds a bitfield from a bitfield message payload. Short payloads are
    /// padded with absent pieces, spare trailing bits are dropped.
    pub fn from_bytes(bytes: &[u8], num_pieces: usize) -> Self {
        let mut bits = Bits::from_slice(bytes);
        bits.resize(num_pieces, false);
        Self { bits }
    }

    /// Payload for a bitfield message, spare bits in the last byte are zero.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bits = self.bits.clone();
        bits.set_uninitialized(false);
        bits.into_vec()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    // Out of range indices are never present.
    pub fn has(&self, idx: usize) -> bool {
        self.bits.get(idx).map_or(false, |bit| *bit)
    }

    /// Marks a piece as present, returns false if it already was or the index
    /// is out of range.
    pub fn set(&mut self, idx: usize) -> bool {
        if idx >= self.bits.len() || self.bits[idx] {
            return false;
        }
        self.bits.set(idx, true);
        true
    }

    pub fn count(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_complete(&self) -> bool {
        self.bits.all()
    }

    /// Indices `other` has that we lack, in ascending order.
    pub fn missing_from<'a>(&'a self, other: &'a Bitfield) -> impl Iterator<Item = usize> + 'a {
        other.bits.iter_ones().filter(move |&idx| !self.has(idx))
    }
}

impl std::fmt::Display for Bitfield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for bit in self.bits.iter() {
            write!(f, "{}", if *bit { '1' } else { '0' })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_monotonic() {
        let mut bf = Bitfield::new(3);
        assert!(bf.set(1));
        assert!(!bf.set(1));
        assert!(bf.has(1));
        assert_eq!(bf.count(), 1);
        assert!(!bf.set(3), "out of range index must be rejected");
        assert_eq!(bf.len(), 3);
    }

    #[test]
    fn test_complete() {
        let mut bf = Bitfield::new(3);
        assert!(!bf.is_complete());
        for idx in 0..3 {
            bf.set(idx);
        }
        assert!(bf.is_complete());
        assert_eq!(bf, Bitfield::full(3));
    }

    #[test]
    fn test_wire_bytes() {
        let mut bf = Bitfield::new(10);
        bf.set(0);
        bf.set(9);
        assert_eq!(bf.to_bytes(), vec![0b1000_0000, 0b0100_0000]);

        // Spare bits set by the sender are ignored.
        let decoded = Bitfield::from_bytes(&[0b1000_0000, 0b0111_1111], 10);
        assert_eq!(decoded, bf);
        assert_eq!(decoded.to_bytes(), vec![0b1000_0000, 0b0100_0000]);

        // Short payload is padded.
        let short = Bitfield::from_bytes(&[0xff], 10);
        assert_eq!(short.len(), 10);
        assert_eq!(short.count(), 8);
    }

    #[test]
    fn test_full_spare_bits_cleared() {
        assert_eq!(Bitfield::full(3).to_bytes(), vec![0b1110_0000]);
    }

    #[test]
    fn test_missing_from() {
        let own = Bitfield::from_bytes(&[0b1010_0000], 4);
        let neighbor = Bitfield::from_bytes(&[0b1111_0000], 4);
        assert_eq!(own.missing_from(&neighbor).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(neighbor.missing_from(&own).count(), 0);
    }

    #[test]
    fn test_display() {
        let bf = Bitfield::from_bytes(&[0b1010_0000], 4);
        assert_eq!(bf.to_string(), "1010");
    }
}
