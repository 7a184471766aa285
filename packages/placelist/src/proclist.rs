use itertools::Itertools;

use crate::{Error, Result, scan};

/// The largest number of items a single strided range may expand to.
///
/// Asking for more than this is treated as a configuration mistake rather
/// than an invitation to allocate gigabytes of masks.
pub const MAX_RANGE_ITEMS: u32 = 65536;

/// One item of an explicit proc list.
///
/// A proc list is a comma-separated sequence of processor IDs, inclusive
/// ranges (optionally strided) and `{...}` union sets. Every item except a
/// union set describes one place per processor ID; a union set describes a
/// single place containing all of its IDs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProcItem {
    /// A single processor ID, e.g. `7`.
    Single(u32),

    /// An inclusive range with a stride, e.g. `4-12:2`.
    ///
    /// A negative stride counts downward, in which case `start >= end`.
    /// The stride is never zero.
    Range {
        /// First processor ID of the range.
        start: u32,
        /// Last processor ID of the range (inclusive bound).
        end: u32,
        /// Step between consecutive IDs; sign gives the direction.
        stride: i32,
    },

    /// A union of processor IDs forming one place, e.g. `{0,2,4}`.
    Set(Vec<u32>),
}

impl ProcItem {
    /// Expands the item into the processor IDs it mentions, in order.
    #[must_use]
    pub fn iter_ids(&self) -> Vec<u32> {
        match *self {
            Self::Single(id) => vec![id],
            Self::Range { start, end, stride } => expand_range(start, end, stride),
            Self::Set(ref ids) => ids.clone(),
        }
    }
}

fn expand_range(start: u32, end: u32, stride: i32) -> Vec<u32> {
    let mut ids = Vec::new();
    let mut current = i64::from(start);
    let end = i64::from(end);
    let stride = i64::from(stride);

    if stride > 0 {
        while current <= end {
            ids.push(u32::try_from(current).unwrap_or(u32::MAX));
            current += stride;
        }
    } else {
        while current >= end {
            ids.push(u32::try_from(current).unwrap_or(u32::MAX));
            current += stride;
        }
    }

    ids
}

/// Parses an explicit proc list.
///
/// An empty string is valid input and returns an empty result.
///
/// # Example
///
/// ```
/// use placelist::ProcItem;
///
/// let items = placelist::parse_proclist("{0,2,4},6-11:2").unwrap();
/// assert_eq!(
///     items,
///     vec![
///         ProcItem::Set(vec![0, 2, 4]),
///         ProcItem::Range {
///             start: 6,
///             end: 11,
///             stride: 2
///         },
///     ]
/// );
/// ```
pub fn parse_proclist(proclist: &str) -> Result<Vec<ProcItem>> {
    scan::split_top_level(proclist)
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .map(parse_item)
        .collect()
}

fn parse_item(part: &str) -> Result<ProcItem> {
    let part = part.trim();

    if let Some(body) = part.strip_prefix('{') {
        let body = body.strip_suffix('}').ok_or_else(|| {
            Error::new(part.to_string(), "unterminated '{' set".to_string())
        })?;

        let ids: Result<Vec<u32>> = body
            .split(',')
            .map(|id| scan::parse_u32(id.trim(), "set member"))
            .collect();

        let ids = ids?;
        if ids.is_empty() {
            return Err(Error::new(part.to_string(), "empty '{}' set".to_string()));
        }

        return Ok(ProcItem::Set(ids));
    }

    let Some((start, rest)) = part.split_once('-') else {
        return Ok(ProcItem::Single(scan::parse_u32(part, "processor ID")?));
    };

    let start = scan::parse_u32(start.trim(), "range start")?;
    let (end, stride) = if let Some((end, stride)) = rest.split_once(':') {
        (
            scan::parse_u32(end.trim(), "range end")?,
            scan::parse_signed(stride.trim())?,
        )
    } else {
        (scan::parse_u32(rest.trim(), "range end")?, 1)
    };

    validate_range(part, start, end, stride)?;

    Ok(ProcItem::Range { start, end, stride })
}

fn validate_range(part: &str, start: u32, end: u32, stride: i32) -> Result<()> {
    if stride == 0 {
        return Err(Error::new(
            part.to_string(),
            "range stride must not be zero".to_string(),
        ));
    }

    if stride > 0 && start > end {
        return Err(Error::new(
            part.to_string(),
            "range start must be <= end for a positive stride".to_string(),
        ));
    }

    if stride < 0 && start < end {
        return Err(Error::new(
            part.to_string(),
            "range start must be >= end for a negative stride".to_string(),
        ));
    }

    let span = (i64::from(end) - i64::from(start)) / i64::from(stride);
    debug_assert!(span >= 0);
    if span > i64::from(MAX_RANGE_ITEMS) {
        return Err(Error::RangeTooLong {
            invalid_value: part.to_string(),
            limit: MAX_RANGE_ITEMS,
        });
    }

    Ok(())
}

/// Emits a proc list in canonical form.
///
/// Parsing the result yields the same items back, so emission is a fixed
/// point: `emit_proclist(&parse_proclist(s)?)` parsed again equals the
/// original items.
#[must_use]
pub fn emit_proclist(items: &[ProcItem]) -> String {
    items.iter().map(emit_item).join(",")
}

fn emit_item(item: &ProcItem) -> String {
    match *item {
        ProcItem::Single(id) => id.to_string(),
        ProcItem::Range { start, end, stride } => {
            if stride == 1 {
                format!("{start}-{end}")
            } else {
                format!("{start}-{end}:{stride}")
            }
        }
        ProcItem::Set(ref ids) => format!("{{{}}}", ids.iter().join(",")),
    }
}
