//! The Search Engine (spec §4.4, C4): a three-stage pipeline — parse a raw
//! query string into typed parameters, evaluate each against the Version
//! Adapter's path evaluation, then expand `_include`/`_revinclude` and
//! assemble a `searchset` `Bundle`.

pub mod engine;
pub mod modifier;
pub mod parse;
pub mod predicate;
pub mod value;

pub use engine::{execute_search, EntryMode, SearchEntry};
pub use modifier::{Comparator, Modifier};
pub use parse::{parse_query, ChainSegment, IncludeSpec, ParsedQuery, ParsedSearchParameter, ParsedValue, ResultParams, SortSpec};
