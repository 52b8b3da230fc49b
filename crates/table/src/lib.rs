//! Owned-range table.
//!
//! Each node in the ring owns a contiguous sub-range `[min, max]` of an
//! 8-bit hash space and stores records whose SSN hashes into that range.
//! The table never de-duplicates on insert and never errors on removing an
//! absent key; the only failure mode is a hash outside `[min, max]`, which
//! callers use as the forward-along-the-ring signal.

use std::fmt;

/// A 12-byte social-security-number identifier. Opaque: no internal
/// structure is assumed beyond its length and byte equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ssn(pub [u8; 12]);

impl From<[u8; 12]> for Ssn {
    fn from(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Ssn {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A stored record. `name` and `email` are decoded lossily at the wire
/// boundary (see `ring_node_codec`), so they are plain owned `String`s here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub ssn: Ssn,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `hash_ssn(ssn)` does not fall within the table's `[min, max]` range.
    OutOfRange,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "hash outside the table's owned range"),
        }
    }
}

/// Stand-in for the ring's external `hash_ssn` function (not part of this
/// crate's retrieved source set; see DESIGN.md). Any total, deterministic
/// `[u8; 12] -> u8` function satisfies the contract this table depends on.
pub fn hash_ssn(ssn: &Ssn) -> u8 {
    crc32fast::hash(&ssn.0) as u8
}

/// A per-node map from SSN to `Record`, bucketed by `hash_ssn` within
/// `[min, max]`.
///
/// # Test
///
/// ```
/// use ring_node_table::{Table, Record, Ssn};
///
/// let mut table = Table::create(0, 255);
/// assert_eq!(table.span(), 256);
///
/// let ssn = Ssn([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
/// table.insert(Record { ssn, name: "Ada".into(), email: "a@b".into() }).unwrap();
/// assert!(table.lookup(&ssn).unwrap().is_some());
/// ```
pub struct Table {
    min: u8,
    max: u8,
    buckets: Vec<Vec<Record>>,
}

impl Table {
    /// An empty table over `[min, max]`, `min <= max`.
    pub fn create(min: u8, max: u8) -> Self {
        assert!(min <= max, "table range must satisfy min <= max");
        let span = max as usize - min as usize + 1;
        Self {
            min,
            max,
            buckets: vec![Vec::new(); span],
        }
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    /// `max - min + 1`.
    pub fn span(&self) -> usize {
        self.max as usize - self.min as usize + 1
    }

    fn contains(&self, hash: u8) -> bool {
        hash >= self.min && hash <= self.max
    }

    fn index(&self, hash: u8) -> usize {
        hash as usize - self.min as usize
    }

    /// Appends `record`; duplicates by SSN are not de-duplicated.
    pub fn insert(&mut self, record: Record) -> Result<(), Error> {
        let hash = hash_ssn(&record.ssn);
        if !self.contains(hash) {
            return Err(Error::OutOfRange);
        }

        let index = self.index(hash);
        self.buckets[index].push(record);
        Ok(())
    }

    /// Removes the first record matching `ssn`, if present. Absence is not
    /// an error; only an out-of-range hash is.
    pub fn remove(&mut self, ssn: &Ssn) -> Result<(), Error> {
        let hash = hash_ssn(ssn);
        if !self.contains(hash) {
            return Err(Error::OutOfRange);
        }

        let idx = self.index(hash);
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|record| &record.ssn == ssn) {
            bucket.remove(pos);
        }

        Ok(())
    }

    /// Returns a copy of the first record matching `ssn`, if present.
    pub fn lookup(&self, ssn: &Ssn) -> Result<Option<Record>, Error> {
        let hash = hash_ssn(ssn);
        if !self.contains(hash) {
            return Err(Error::OutOfRange);
        }

        Ok(self.buckets[self.index(hash)]
            .iter()
            .find(|record| &record.ssn == ssn)
            .cloned())
    }

    /// Enumerates records whose hash lies in `[k, max]`, in hash order.
    /// `k` below `min` is clamped to `min`.
    pub fn buckets_from(&self, k: u8) -> impl Iterator<Item = (u8, &[Record])> {
        let start = k.max(self.min);
        (start..=self.max).map(move |hash| (hash, self.buckets[self.index(hash)].as_slice()))
    }

    /// Produces a new table over `[new_min, new_max]`; records whose hash
    /// falls in the intersection of the old and new ranges are carried
    /// over, the rest are dropped.
    pub fn resize(&self, new_min: u8, new_max: u8) -> Self {
        let mut out = Self::create(new_min, new_max);

        let lo = self.min.max(new_min);
        let hi = self.max.min(new_max);
        if lo <= hi {
            for hash in lo..=hi {
                let index = self.index(hash);
                let target = hash as usize - new_min as usize;
                out.buckets[target] = self.buckets[index].clone();
            }
        }

        out
    }
}
