//! # Boardview DRC
//!
//! Design-rule violations as reported by the layout authority, and their
//! conversion into overlay geometry the renderer draws above every layer.
//!
//! Checking itself happens elsewhere; this crate only carries the results.

pub mod overlay;
pub mod region;

pub use overlay::{overlay_payload, region_bounds, OVERLAY_COLOR};
pub use region::{parse_regions, DrcError, DrcRegion};
