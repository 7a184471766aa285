use itertools::Itertools;

use crate::{Error, Result, scan};

/// The abstract place names accepted by the place-list grammar.
///
/// An abstract name stands for "one place per unit of this granularity",
/// optionally capped to the first `n` units by a `(n)` suffix.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AbstractPlaces {
    /// One place per hardware thread.
    Threads,
    /// One place per core.
    Cores,
    /// One place per socket.
    Sockets,
    /// One place per NUMA domain.
    NumaDomains,
    /// One place per last-level cache.
    LlCaches,
}

impl AbstractPlaces {
    fn keyword(self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Cores => "cores",
            Self::Sockets => "sockets",
            Self::NumaDomains => "numa_domains",
            Self::LlCaches => "ll_caches",
        }
    }

    fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "threads" => Some(Self::Threads),
            "cores" => Some(Self::Cores),
            "sockets" => Some(Self::Sockets),
            "numa_domains" => Some(Self::NumaDomains),
            "ll_caches" => Some(Self::LlCaches),
            _ => None,
        }
    }
}

/// One subplace of a `{...}` place body: a starting processor ID with an
/// optional `:count` and `:stride` expansion.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Subplace {
    /// First processor ID of the subplace.
    pub start: u32,

    /// How many IDs the subplace contributes (default 1).
    pub count: Option<u32>,

    /// Step between contributed IDs (default 1; sign gives direction).
    pub stride: Option<i32>,
}

/// The body of a place, before any generative `:count:stride` clause.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PlaceBody {
    /// A single processor ID.
    ProcId(u32),

    /// A `{...}` union of subplaces forming one place.
    Set(Vec<Subplace>),

    /// `!` complement of the inner body with respect to the full mask.
    Complement(Box<PlaceBody>),

    /// An abstract name such as `threads` or `cores(4)`.
    Abstract {
        /// The granularity the name stands for.
        layer: AbstractPlaces,
        /// Cap on the number of units taken, when `(n)` was given.
        count: Option<u32>,
    },
}

/// One place expression: a body plus an optional generative clause that
/// produces `count` places, each shifted `stride` elements from the last.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Place {
    /// What the base place is made of.
    pub body: PlaceBody,

    /// Number of places to generate from the base place.
    pub count: Option<u32>,

    /// Element-wise shift between generated places (default +1).
    pub stride: Option<i32>,
}

/// Parses a place list.
///
/// An empty string is valid input and returns an empty result.
///
/// # Example
///
/// ```
/// use placelist::{Place, PlaceBody, Subplace};
///
/// let places = placelist::parse_places("{0:4},{4:4}").unwrap();
/// assert_eq!(places.len(), 2);
/// assert_eq!(
///     places[0].body,
///     PlaceBody::Set(vec![Subplace {
///         start: 0,
///         count: Some(4),
///         stride: None
///     }])
/// );
/// ```
pub fn parse_places(placelist: &str) -> Result<Vec<Place>> {
    scan::split_top_level(placelist)
        .into_iter()
        .filter(|part| !part.trim().is_empty())
        .map(parse_place)
        .collect()
}

fn parse_place(part: &str) -> Result<Place> {
    let part = part.trim();
    let (body_text, count, stride) = split_generative_clause(part)?;
    let body = parse_body(body_text)?;

    Ok(Place {
        body,
        count,
        stride,
    })
}

/// Splits `body(:count(:stride)?)?` where the body may itself contain `:`
/// only inside `{...}`.
fn split_generative_clause(part: &str) -> Result<(&str, Option<u32>, Option<i32>)> {
    let mut depth = 0_u32;
    let mut clause_start = None;

    for (position, character) in part.char_indices() {
        match character {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                clause_start = Some(position);
                break;
            }
            _ => {}
        }
    }

    let Some(clause_start) = clause_start else {
        return Ok((part, None, None));
    };

    let body = &part[..clause_start];
    let clause = &part[clause_start + 1..];

    let (count, stride) = if let Some((count, stride)) = clause.split_once(':') {
        (
            scan::parse_u32(count.trim(), "place count")?,
            Some(scan::parse_signed(stride)?),
        )
    } else {
        (scan::parse_u32(clause.trim(), "place count")?, None)
    };

    Ok((body, Some(count), stride))
}

fn parse_body(body: &str) -> Result<PlaceBody> {
    let body = body.trim();

    if let Some(inner) = body.strip_prefix('!') {
        return Ok(PlaceBody::Complement(Box::new(parse_body(inner)?)));
    }

    if let Some(set) = body.strip_prefix('{') {
        let set = set.strip_suffix('}').ok_or_else(|| {
            Error::new(body.to_string(), "unterminated '{' place".to_string())
        })?;

        let subplaces: Result<Vec<Subplace>> = set
            .split(',')
            .filter(|subplace| !subplace.trim().is_empty())
            .map(parse_subplace)
            .collect();

        let subplaces = subplaces?;
        if subplaces.is_empty() {
            return Err(Error::new(body.to_string(), "empty '{}' place".to_string()));
        }

        return Ok(PlaceBody::Set(subplaces));
    }

    if body.starts_with(|c: char| c.is_ascii_digit()) {
        return Ok(PlaceBody::ProcId(scan::parse_u32(body, "processor ID")?));
    }

    parse_abstract(body)
}

fn parse_abstract(body: &str) -> Result<PlaceBody> {
    let (keyword, count) = if let Some((keyword, rest)) = body.split_once('(') {
        let count_text = rest.strip_suffix(')').ok_or_else(|| {
            Error::new(body.to_string(), "unterminated '(' count".to_string())
        })?;
        (
            keyword.trim(),
            Some(scan::parse_u32(count_text.trim(), "place count")?),
        )
    } else {
        (body, None)
    };

    let layer = AbstractPlaces::from_keyword(keyword).ok_or_else(|| {
        Error::new(
            body.to_string(),
            "expected a processor ID, '{', '!' or an abstract place name".to_string(),
        )
    })?;

    Ok(PlaceBody::Abstract { layer, count })
}

fn parse_subplace(subplace: &str) -> Result<Subplace> {
    let subplace = subplace.trim();
    let mut fields = subplace.splitn(3, ':');

    let start = scan::parse_u32(
        fields.next().unwrap_or_default().trim(),
        "subplace start",
    )?;
    let count = fields
        .next()
        .map(|count| scan::parse_u32(count.trim(), "subplace count"))
        .transpose()?;
    let stride = fields.next().map(scan::parse_signed).transpose()?;

    Ok(Subplace {
        start,
        count,
        stride,
    })
}

/// Emits a place list in canonical form.
#[must_use]
pub fn emit_places(places: &[Place]) -> String {
    places.iter().map(emit_place).join(",")
}

fn emit_place(place: &Place) -> String {
    let mut text = emit_body(&place.body);

    if let Some(count) = place.count {
        text.push_str(&format!(":{count}"));
        if let Some(stride) = place.stride {
            text.push_str(&format!(":{stride}"));
        }
    }

    text
}

fn emit_body(body: &PlaceBody) -> String {
    match *body {
        PlaceBody::ProcId(id) => id.to_string(),
        PlaceBody::Set(ref subplaces) => {
            format!("{{{}}}", subplaces.iter().map(emit_subplace).join(","))
        }
        PlaceBody::Complement(ref inner) => format!("!{}", emit_body(inner)),
        PlaceBody::Abstract { layer, count } => match count {
            Some(count) => format!("{}({count})", layer.keyword()),
            None => layer.keyword().to_string(),
        },
    }
}

fn emit_subplace(subplace: &Subplace) -> String {
    let mut text = subplace.start.to_string();

    if let Some(count) = subplace.count {
        text.push_str(&format!(":{count}"));
        if let Some(stride) = subplace.stride {
            text.push_str(&format!(":{stride}"));
        }
    }

    text
}
