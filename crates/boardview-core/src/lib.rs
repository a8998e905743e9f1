//! # Boardview Core
//!
//! Data model shared by the boardview crates: object identity as supplied by
//! the layout authority, the packed per-instance state word, board layers,
//! decoded layer payloads, and the placement math used by move/rotate/flip.
//!
//! Nothing here touches the GPU; see `boardview-renderer` for that.

pub mod geometry;
pub mod layer;
pub mod object;
pub mod packed;
pub mod payload;
pub mod placement;
pub mod spatial;

pub use geometry::{BBox, Point};
pub use layer::{Layer, LayerId, LayerStack, Rgba, DEFAULT_LAYER_COLOR, DRC_OVERLAY_LAYER_ID};
pub use object::{EntityKind, ObjectId, ObjectKind, ObjectRange, VertexSpan};
pub use packed::{BatchLevel, InstanceRecord, InstanceState};
pub use payload::{Channel, DecodedLod, LayerPayload, LodPayload, PayloadError};
pub use placement::Placement;
pub use spatial::InstanceLocator;
