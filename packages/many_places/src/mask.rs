//! A bitset over OS processor IDs with the set algebra and printing needed
//! by place construction and binding.

use std::fmt::{Debug, Display};
use std::str::FromStr;

use crate::ProcessorId;

/// Number of processors covered by one mask word. This also matches the
/// width of a Windows processor group, which is why the group of a bit is
/// derivable from its index alone.
const BITS_PER_WORD: u32 = 64;

/// A set of OS processor IDs.
///
/// The mask grows on demand when bits are set; testing a bit beyond the
/// current capacity reports it as clear.
///
/// # Printing
///
/// [`Display`] produces the conventional comma-separated form with closed
/// ranges for runs of three or more (`"1,2,4-7,9"`), or `"{<empty>}"` for an
/// empty mask. [`FromStr`] accepts exactly that format, so printing and
/// parsing round-trip.
///
/// # Example
///
/// ```
/// use many_places::ProcMask;
///
/// let mut mask = ProcMask::new();
/// mask.set(1);
/// mask.set(2);
/// for id in 4..=7 {
///     mask.set(id);
/// }
/// mask.set(9);
///
/// assert_eq!(mask.to_string(), "1,2,4-7,9");
/// assert_eq!("1,2,4-7,9".parse::<ProcMask>().unwrap(), mask);
/// ```
#[derive(Clone, Default, Eq)]
pub struct ProcMask {
    words: Vec<u64>,
}

impl ProcMask {
    /// Creates an empty mask.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mask containing every ID in `0..count`.
    #[must_use]
    pub fn all_up_to(count: ProcessorId) -> Self {
        let mut mask = Self::new();
        for id in 0..count {
            mask.set(id);
        }
        mask
    }

    /// Creates a mask from the given IDs.
    #[must_use]
    pub fn from_ids(ids: impl IntoIterator<Item = ProcessorId>) -> Self {
        let mut mask = Self::new();
        for id in ids {
            mask.set(id);
        }
        mask
    }

    fn word_and_bit(id: ProcessorId) -> (usize, u64) {
        (
            (id / BITS_PER_WORD) as usize,
            1_u64 << u64::from(id % BITS_PER_WORD),
        )
    }

    /// Adds a processor ID to the set.
    pub fn set(&mut self, id: ProcessorId) {
        let (word, bit) = Self::word_and_bit(id);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        *self
            .words
            .get_mut(word)
            .expect("just resized to cover this word") |= bit;
    }

    /// Removes a processor ID from the set.
    pub fn clear(&mut self, id: ProcessorId) {
        let (word, bit) = Self::word_and_bit(id);
        if let Some(word) = self.words.get_mut(word) {
            *word &= !bit;
        }
    }

    /// Whether a processor ID is in the set.
    #[must_use]
    pub fn test(&self, id: ProcessorId) -> bool {
        let (word, bit) = Self::word_and_bit(id);
        self.words.get(word).is_some_and(|word| word & bit != 0)
    }

    /// Removes every ID from the set.
    pub fn clear_all(&mut self) {
        self.words.clear();
    }

    /// Replaces this set's contents with another's.
    pub fn copy_from(&mut self, other: &Self) {
        self.words.clear();
        self.words.extend_from_slice(&other.words);
    }

    /// Adds every ID of `other` to this set.
    pub fn union_with(&mut self, other: &Self) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (destination, source) in self.words.iter_mut().zip(&other.words) {
            *destination |= source;
        }
    }

    /// Removes every ID not also in `other`.
    pub fn intersect_with(&mut self, other: &Self) {
        for (position, word) in self.words.iter_mut().enumerate() {
            *word &= other.words.get(position).copied().unwrap_or(0);
        }
    }

    /// Flips membership of every ID in `0..=max_id`; IDs above `max_id` are
    /// cleared.
    pub fn complement_up_to(&mut self, max_id: ProcessorId) {
        let full = Self::all_up_to(max_id + 1);
        if full.words.len() > self.words.len() {
            self.words.resize(full.words.len(), 0);
        }
        for (word, limit) in self.words.iter_mut().zip(full.words.iter().chain(std::iter::repeat(&0))) {
            *word = !*word & limit;
        }
    }

    /// Whether the set contains no IDs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Whether this set and `other` share at least one ID.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.words
            .iter()
            .zip(&other.words)
            .any(|(a, b)| a & b != 0)
    }

    /// Whether every ID of this set is also in `other`.
    #[must_use]
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.words
            .iter()
            .enumerate()
            .all(|(position, word)| word & !other.words.get(position).copied().unwrap_or(0) == 0)
    }

    /// Number of IDs in the set.
    #[must_use]
    pub fn count(&self) -> usize {
        self.words
            .iter()
            .map(|word| word.count_ones() as usize)
            .sum()
    }

    /// The smallest ID in the set, if any.
    #[must_use]
    pub fn first(&self) -> Option<ProcessorId> {
        self.iter().next()
    }

    /// The smallest ID greater than `id`, if any.
    #[must_use]
    pub fn next_after(&self, id: ProcessorId) -> Option<ProcessorId> {
        self.iter().find(|&candidate| candidate > id)
    }

    /// Iterates the IDs in the set in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = ProcessorId> + '_ {
        self.words.iter().enumerate().flat_map(|(position, word)| {
            let base = u32::try_from(position).expect("mask word count fits in u32") * BITS_PER_WORD;
            (0..BITS_PER_WORD).filter_map(move |bit| (word & (1 << bit) != 0).then_some(base + bit))
        })
    }

    /// The processor group shared by every ID in the set, or `None` when the
    /// set is empty or spans more than one group.
    ///
    /// Processor groups are 64 IDs wide, so the group of an ID is derivable
    /// from the ID alone. On platforms without processor groups the notion
    /// degenerates gracefully: masks narrower than 64 IDs always report
    /// group 0.
    #[must_use]
    pub fn group_of(&self) -> Option<u32> {
        let mut group = None;
        for id in self.iter() {
            let id_group = id / BITS_PER_WORD;
            match group {
                None => group = Some(id_group),
                Some(group) if group == id_group => {}
                Some(_) => return None,
            }
        }
        group
    }
}

impl PartialEq for ProcMask {
    fn eq(&self, other: &Self) -> bool {
        let longest = self.words.len().max(other.words.len());
        (0..longest).all(|position| {
            self.words.get(position).copied().unwrap_or(0)
                == other.words.get(position).copied().unwrap_or(0)
        })
    }
}

impl std::hash::Hash for ProcMask {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Trailing zero words must not affect the hash, for consistency
        // with the trailing-zero-insensitive equality above.
        let significant = self
            .words
            .iter()
            .rposition(|word| *word != 0)
            .map_or(0, |position| position + 1);
        self.words[..significant].hash(state);
    }
}

impl Display for ProcMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return f.write_str("{<empty>}");
        }

        let mut first_item = true;
        let mut run_start: Option<(ProcessorId, ProcessorId)> = None;

        let mut flush =
            |f: &mut std::fmt::Formatter<'_>, first_item: &mut bool, start: ProcessorId, end: ProcessorId| {
                if !*first_item {
                    f.write_str(",")?;
                }
                *first_item = false;
                match end - start {
                    0 => write!(f, "{start}"),
                    1 => write!(f, "{start},{end}"),
                    _ => write!(f, "{start}-{end}"),
                }
            };

        for id in self.iter() {
            run_start = match run_start {
                None => Some((id, id)),
                Some((start, end)) if id == end + 1 => Some((start, id)),
                Some((start, end)) => {
                    flush(f, &mut first_item, start, end)?;
                    Some((id, id))
                }
            };
        }

        if let Some((start, end)) = run_start {
            flush(f, &mut first_item, start, end)?;
        }

        Ok(())
    }
}

impl Debug for ProcMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ProcMask({self})")
    }
}

impl FromStr for ProcMask {
    type Err = placelist::Error;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        if text == "{<empty>}" {
            return Ok(Self::new());
        }

        let items = placelist::parse_proclist(text)?;
        let mut mask = Self::new();
        for item in &items {
            for id in item.iter_ids() {
                mask.set(id);
            }
        }
        Ok(mask)
    }
}

impl FromIterator<ProcessorId> for ProcMask {
    fn from_iter<I: IntoIterator<Item = ProcessorId>>(ids: I) -> Self {
        Self::from_ids(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_algebra_smoke_test() {
        let mut mask = ProcMask::new();
        assert!(mask.is_empty());
        assert!(!mask.test(5));

        mask.set(5);
        mask.set(70);
        assert!(mask.test(5));
        assert!(mask.test(70));
        assert_eq!(mask.count(), 2);

        mask.clear(5);
        assert!(!mask.test(5));
        assert_eq!(mask.first(), Some(70));

        let mut other = ProcMask::from_ids([1, 70]);
        other.intersect_with(&mask);
        assert_eq!(other, ProcMask::from_ids([70]));

        other.union_with(&ProcMask::from_ids([0, 1]));
        assert_eq!(other.count(), 3);
    }

    #[test]
    fn equality_ignores_capacity() {
        let mut wide = ProcMask::new();
        wide.set(200);
        wide.clear(200);
        wide.set(3);

        let narrow = ProcMask::from_ids([3]);
        assert_eq!(wide, narrow);
    }

    #[test]
    fn complement() {
        let mut mask = ProcMask::from_ids([0, 2]);
        mask.complement_up_to(4);
        assert_eq!(mask, ProcMask::from_ids([1, 3, 4]));
    }

    #[test]
    fn subset_and_intersection() {
        let small = ProcMask::from_ids([1, 2]);
        let large = ProcMask::from_ids([0, 1, 2, 3]);

        assert!(small.is_subset_of(&large));
        assert!(!large.is_subset_of(&small));
        assert!(small.intersects(&large));
        assert!(!small.intersects(&ProcMask::from_ids([5])));
    }

    #[test]
    fn iteration_order_is_ascending() {
        let mask = ProcMask::from_ids([65, 2, 130, 0]);
        let ids: Vec<_> = mask.iter().collect();
        assert_eq!(ids, vec![0, 2, 65, 130]);
        assert_eq!(mask.next_after(2), Some(65));
        assert_eq!(mask.next_after(130), None);
    }

    #[test]
    fn display_format() {
        assert_eq!(ProcMask::new().to_string(), "{<empty>}");
        assert_eq!(ProcMask::from_ids([7]).to_string(), "7");
        assert_eq!(
            ProcMask::from_ids([1, 2, 4, 5, 6, 7, 9]).to_string(),
            "1,2,4-7,9"
        );
    }

    #[test]
    fn print_parse_round_trip() {
        for ids in [vec![], vec![0], vec![1, 2, 4, 5, 6, 7, 9], vec![0, 63, 64, 65, 200]] {
            let mask = ProcMask::from_ids(ids);
            let printed = mask.to_string();
            let parsed: ProcMask = printed.parse().unwrap();
            assert_eq!(parsed, mask, "round trip failed for '{printed}'");
        }
    }

    #[test]
    fn group_queries() {
        assert_eq!(ProcMask::new().group_of(), None);
        assert_eq!(ProcMask::from_ids([0, 63]).group_of(), Some(0));
        assert_eq!(ProcMask::from_ids([64, 100]).group_of(), Some(1));
        assert_eq!(ProcMask::from_ids([63, 64]).group_of(), None);
    }
}
