use itertools::Itertools;

use crate::{Error, Result, scan};

/// How many units of a layer a subset item requests.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubsetCount {
    /// `*`: every unit of the layer.
    All,

    /// An explicit unit count.
    Count(u32),
}

/// The layer names accepted by the hardware subset grammar.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SubsetLayer {
    /// `sockets`
    Sockets,
    /// `dice`
    Dice,
    /// `modules`
    Modules,
    /// `tiles`
    Tiles,
    /// `numa_domains`
    NumaDomains,
    /// `l3_caches`
    L3Caches,
    /// `l2_caches`
    L2Caches,
    /// `l1_caches`
    L1Caches,
    /// `cores`
    Cores,
    /// `threads`
    Threads,
    /// `proc_groups`
    ProcGroups,
}

impl SubsetLayer {
    fn keyword(self) -> &'static str {
        match self {
            Self::Sockets => "sockets",
            Self::Dice => "dice",
            Self::Modules => "modules",
            Self::Tiles => "tiles",
            Self::NumaDomains => "numa_domains",
            Self::L3Caches => "l3_caches",
            Self::L2Caches => "l2_caches",
            Self::L1Caches => "l1_caches",
            Self::Cores => "cores",
            Self::Threads => "threads",
            Self::ProcGroups => "proc_groups",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "sockets" => Some(Self::Sockets),
            "dice" => Some(Self::Dice),
            "modules" => Some(Self::Modules),
            "tiles" => Some(Self::Tiles),
            "numa_domains" => Some(Self::NumaDomains),
            "l3_caches" => Some(Self::L3Caches),
            "l2_caches" => Some(Self::L2Caches),
            "l1_caches" => Some(Self::L1Caches),
            "cores" => Some(Self::Cores),
            "threads" => Some(Self::Threads),
            "proc_groups" => Some(Self::ProcGroups),
            _ => None,
        }
    }
}

/// A core attribute restricting a subset item at the core layer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubsetAttr {
    /// `intel_core`: performance cores only.
    IntelCore,

    /// `intel_atom`: efficiency cores only.
    IntelAtom,

    /// `eff<n>`: cores of efficiency class `n` only.
    Eff(u8),
}

/// One item of a hardware subset expression: a unit count with an optional
/// offset, the layer it applies to, and optional core attributes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubsetItem {
    /// How many units of the layer to keep.
    pub count: SubsetCount,

    /// How many leading units to skip before counting.
    pub offset: u32,

    /// The layer the item applies to.
    pub layer: SubsetLayer,

    /// Core attributes, meaningful only at the core layer.
    pub attrs: Vec<SubsetAttr>,
}

/// Parses a hardware subset expression.
///
/// Attribute segments (`intel_core`, `intel_atom`, `eff<n>`) following an
/// item attach to that item, so `*cores:intel_core,eff1` is one item with
/// two attributes rather than two items.
///
/// # Example
///
/// ```
/// use placelist::{SubsetCount, SubsetItem, SubsetLayer};
///
/// let items = placelist::parse_subset("1@1 sockets, 4 cores").unwrap();
/// assert_eq!(
///     items,
///     vec![
///         SubsetItem {
///             count: SubsetCount::Count(1),
///             offset: 1,
///             layer: SubsetLayer::Sockets,
///             attrs: vec![],
///         },
///         SubsetItem {
///             count: SubsetCount::Count(4),
///             offset: 0,
///             layer: SubsetLayer::Cores,
///             attrs: vec![],
///         },
///     ]
/// );
/// ```
pub fn parse_subset(subset: &str) -> Result<Vec<SubsetItem>> {
    let mut items: Vec<SubsetItem> = Vec::new();

    for segment in subset.split(',') {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }

        if let Some(attr) = try_parse_attr(segment)? {
            let Some(last) = items.last_mut() else {
                return Err(Error::new(
                    segment.to_string(),
                    "attribute without a preceding subset item".to_string(),
                ));
            };
            last.attrs.push(attr);
            continue;
        }

        items.push(parse_item(segment)?);
    }

    Ok(items)
}

/// Recognizes a bare attribute segment. Returns `Ok(None)` if the segment
/// does not look like an attribute at all (and so should parse as an item).
fn try_parse_attr(segment: &str) -> Result<Option<SubsetAttr>> {
    match segment {
        "intel_core" => return Ok(Some(SubsetAttr::IntelCore)),
        "intel_atom" => return Ok(Some(SubsetAttr::IntelAtom)),
        _ => {}
    }

    if let Some(digits) = segment.strip_prefix("eff") {
        let eff = digits.parse::<u8>().map_err(|inner| {
            Error::caused_by(
                segment.to_string(),
                "efficiency attribute could not be parsed".to_string(),
                inner,
            )
        })?;
        return Ok(Some(SubsetAttr::Eff(eff)));
    }

    Ok(None)
}

fn parse_item(segment: &str) -> Result<SubsetItem> {
    // Attributes after ':' belong to the item.
    let (head, attrs_text) = match segment.split_once(':') {
        Some((head, attrs)) => (head.trim(), Some(attrs)),
        None => (segment, None),
    };

    // The count (or '*') ends at '@' or at the first non-numeric character.
    let (count_text, rest) = split_count(head);

    let count = if count_text == "*" {
        SubsetCount::All
    } else {
        SubsetCount::Count(scan::parse_u32(count_text, "subset count")?)
    };

    let (offset, layer_text) = if let Some(rest) = rest.strip_prefix('@') {
        let offset_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        (
            scan::parse_u32(&rest[..offset_end], "subset offset")?,
            rest[offset_end..].trim(),
        )
    } else {
        (0, rest.trim())
    };

    let layer = SubsetLayer::from_keyword(layer_text).ok_or_else(|| {
        Error::new(
            segment.to_string(),
            format!("unknown layer name '{layer_text}'"),
        )
    })?;

    let attrs = match attrs_text {
        Some(attrs_text) => attrs_text
            .split(',')
            .map(|attr| {
                let attr = attr.trim();
                try_parse_attr(attr)?.ok_or_else(|| {
                    Error::new(attr.to_string(), "unknown core attribute".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => vec![],
    };

    Ok(SubsetItem {
        count,
        offset,
        layer,
        attrs,
    })
}

fn split_count(head: &str) -> (&str, &str) {
    if let Some(rest) = head.strip_prefix('*') {
        return ("*", rest.trim_start());
    }

    let count_end = head
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(head.len());
    (&head[..count_end], head[count_end..].trim_start())
}

/// Emits a hardware subset expression in canonical form.
///
/// The canonical form is a fixed point: emitting what it parses back to
/// reproduces the same string.
#[must_use]
pub fn emit_subset(items: &[SubsetItem]) -> String {
    items.iter().map(emit_item).join(",")
}

fn emit_item(item: &SubsetItem) -> String {
    let mut text = match item.count {
        SubsetCount::All => "*".to_string(),
        SubsetCount::Count(count) => count.to_string(),
    };

    if item.offset != 0 {
        text.push_str(&format!("@{}", item.offset));
    }

    text.push_str(item.layer.keyword());

    if !item.attrs.is_empty() {
        text.push(':');
        text.push_str(&item.attrs.iter().map(|attr| emit_attr(*attr)).join(","));
    }

    text
}

fn emit_attr(attr: SubsetAttr) -> String {
    match attr {
        SubsetAttr::IntelCore => "intel_core".to_string(),
        SubsetAttr::IntelAtom => "intel_atom".to_string(),
        SubsetAttr::Eff(eff) => format!("eff{eff}"),
    }
}
