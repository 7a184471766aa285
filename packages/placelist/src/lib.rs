//! Utilities for parsing and emitting the three string formats used to
//! steer thread placement on explicitly-managed hardware: explicit proc
//! lists, OpenMP-style place lists and hardware subset expressions.
//!
//! Example proc list: `{0,2,4},{1,3,5},6-11:2`
//!
//! Example place list: `{0:4}:4:4` (four places of four processors each)
//!
//! Example hardware subset: `1@1sockets,4cores`
//!
//! # Scope
//!
//! This package is purely syntactic: it converts between strings and typed
//! structures and back. It knows nothing about the machine the strings will
//! be applied to; resolving processor IDs against a real topology (and the
//! associated out-of-range warnings and fallbacks) is the business of the
//! `many_places` package.
//!
//! Emission always produces the canonical spelling of an expression, so
//! `emit(parse(emit(parse(s))))` is a fixed point for every valid `s`.
//!
//! # Example
//!
//! ```
//! let items = placelist::parse_proclist("0-9,32-35,40").unwrap();
//! println!("Selected places: {items:?}");
//! println!("Canonical form: {}", placelist::emit_proclist(&items));
//! ```

mod error;
mod places;
mod proclist;
mod scan;
mod subset;

pub use error::*;
pub use places::*;
pub use proclist::*;
pub use subset::*;
