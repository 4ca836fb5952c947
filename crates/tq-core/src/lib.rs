//! # tq-core — The "Model" of TRIAGE
//!
//! Everything the issue search layer agrees on before any store is touched:
//!
//! - [`model`]: relational records (groups, projects, inbox rows) and the
//!   columnar event row.
//! - [`filter`] / [`parser`]: the normalized filter model and the search
//!   syntax that produces it.
//! - [`cursor`] / [`paginator`]: the opaque pagination token and the
//!   position-based paginator that issues it.
//! - [`ident`]: short id and event id recognition.
//!
//! No I/O happens here. Stores, backends and the HTTP surface live in `tq-hub`.

pub mod cursor;
pub mod error;
pub mod filter;
pub mod ident;
pub mod model;
pub mod paginator;
pub mod parser;
pub mod sort;

pub use cursor::{Cursor, CursorValue};
pub use error::{SearchError, SearchResult};
pub use filter::{Filter, FilterValue, KeyClass, Operator, Scalar};
pub use paginator::{CursorPage, SequenceEntry, SequencePaginator};
pub use sort::SortBy;
