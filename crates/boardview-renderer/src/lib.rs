//! # Boardview Renderer
//!
//! GPU-resident geometry for the board view: layer geometry uploaded once,
//! then edited in place for hide/show/highlight and interactive
//! move/rotate/flip, and composed into draw calls each frame at a
//! zoom-selected level of detail.
//!
//! The renderer talks to the graphics API only through [`gpu::GpuDevice`];
//! [`gpu::HeadlessDevice`] records everything in memory.

pub mod compositor;
pub mod config;
pub mod gpu;
pub mod history;
pub mod scene;
pub mod store;
pub mod synced;
pub mod transform;
pub mod viewer;
pub mod viewport;
pub mod visibility;

pub use compositor::{select_lod, FrameCompositor, FrameStats};
pub use config::{ConfigError, ViewerConfig};
pub use gpu::{GpuDevice, HeadlessDevice};
pub use scene::SceneState;
pub use store::{GeometryStore, RenderEntity, ShapeLodGrid};
pub use synced::{BufferError, SyncedBuffer};
pub use transform::{TransformEngine, TransformError, TransformSummary};
pub use viewer::Viewer;
pub use viewport::Viewport;
pub use visibility::VisibilityEngine;
