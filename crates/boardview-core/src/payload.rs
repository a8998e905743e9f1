//! Decoded layer geometry as handed over by the parsing stage.
//!
//! Numeric channels arrive in one of three forms: inline arrays, base64 strings
//! holding raw little-endian bytes, or views into a larger binary blob shared
//! by the whole document. Decoding always yields a freshly owned vector sized
//! exactly to the channel, so no per-LOD buffer keeps the parent blob alive.

use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use bytemuck::Pod;
use serde::Deserialize;
use thiserror::Error;

use crate::layer::{Rgba, DEFAULT_LAYER_COLOR};
use crate::object::EntityKind;
use crate::packed::{InstanceRecord, VISIBLE_BIT};

/// Hard cap on LOD levels per batched entity.
pub const MAX_BATCH_LODS: usize = 5;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid base64 channel: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("{channel}: {len} bytes is not a multiple of the {element}-byte element size")]
    Misaligned {
        channel: &'static str,
        len: usize,
        element: usize,
    },

    #[error("blob view {offset}+{len} exceeds parent of {parent_len} bytes")]
    ViewOutOfBounds {
        offset: usize,
        len: usize,
        parent_len: usize,
    },

    #[error("vertex data has {floats} floats, expected {expected} for {declared} vertices")]
    VertexCountMismatch {
        declared: usize,
        floats: usize,
        expected: usize,
    },

    #[error("{channel} has {actual} entries, expected {expected}")]
    ChannelLength {
        channel: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("index {index} references vertex beyond count {vertex_count}")]
    IndexOutOfRange { index: u32, vertex_count: usize },

    #[error("instance data of {floats} floats does not split into {count} instances of 2 or 3 floats")]
    InstanceStride { floats: usize, count: usize },

    #[error("{kind} entity has {count} LOD levels, at most {max} supported")]
    TooManyLods {
        kind: &'static str,
        count: usize,
        max: usize,
    },
}

/// A typed window into a shared binary blob.
#[derive(Debug, Clone)]
pub struct BlobView {
    pub parent: Arc<[u8]>,
    pub byte_offset: usize,
    pub byte_len: usize,
}

impl BlobView {
    pub fn new(parent: Arc<[u8]>, byte_offset: usize, byte_len: usize) -> Self {
        Self {
            parent,
            byte_offset,
            byte_len,
        }
    }

    fn bytes(&self) -> Result<&[u8], PayloadError> {
        self.byte_offset
            .checked_add(self.byte_len)
            .and_then(|end| self.parent.get(self.byte_offset..end))
            .ok_or(PayloadError::ViewOutOfBounds {
                offset: self.byte_offset,
                len: self.byte_len,
                parent_len: self.parent.len(),
            })
    }
}

/// One numeric channel in any of its accepted encodings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Channel<T> {
    Inline(Vec<T>),
    Encoded(String),
    #[serde(skip)]
    View(BlobView),
}

impl<T: Pod> Channel<T> {
    pub fn decode(self, channel: &'static str) -> Result<Vec<T>, PayloadError> {
        match self {
            Channel::Inline(mut values) => {
                values.shrink_to_fit();
                Ok(values)
            }
            Channel::Encoded(text) => {
                let bytes = general_purpose::STANDARD.decode(text.as_bytes())?;
                collect_owned(channel, &bytes)
            }
            Channel::View(view) => collect_owned(channel, view.bytes()?),
        }
    }
}

impl<T> From<Vec<T>> for Channel<T> {
    fn from(values: Vec<T>) -> Self {
        Channel::Inline(values)
    }
}

fn collect_owned<T: Pod>(channel: &'static str, bytes: &[u8]) -> Result<Vec<T>, PayloadError> {
    let element = std::mem::size_of::<T>();
    if bytes.len() % element != 0 {
        return Err(PayloadError::Misaligned {
            channel,
            len: bytes.len(),
            element,
        });
    }
    Ok(bytemuck::pod_collect_to_vec(bytes))
}

/// Encode a float slice the way the authority does on the wire.
pub fn encode_f32_base64(values: &[f32]) -> String {
    general_purpose::STANDARD.encode(bytemuck::cast_slice::<f32, u8>(values))
}

pub fn encode_u32_base64(values: &[u32]) -> String {
    general_purpose::STANDARD.encode(bytemuck::cast_slice::<u32, u8>(values))
}

/// One LOD level as delivered, before decoding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LodPayload {
    pub vertex_data: Channel<f32>,
    pub vertex_count: usize,
    #[serde(default)]
    pub index_data: Option<Channel<u32>>,
    #[serde(default)]
    pub index_count: Option<usize>,
    #[serde(default)]
    pub alpha_data: Option<Channel<f32>>,
    #[serde(default)]
    pub visibility_data: Option<Channel<f32>>,
    #[serde(default)]
    pub instance_data: Option<Channel<f32>>,
    #[serde(default)]
    pub instance_count: Option<usize>,
}

impl LodPayload {
    /// Vertices as flat `[x0, y0, x1, y1, ...]`.
    pub fn new(vertices: Vec<f32>) -> Self {
        Self {
            vertex_count: vertices.len() / 2,
            vertex_data: Channel::Inline(vertices),
            index_data: None,
            index_count: None,
            alpha_data: None,
            visibility_data: None,
            instance_data: None,
            instance_count: None,
        }
    }

    pub fn with_indices(mut self, indices: Vec<u32>) -> Self {
        self.index_count = Some(indices.len());
        self.index_data = Some(Channel::Inline(indices));
        self
    }

    pub fn with_alpha(mut self, alpha: Vec<f32>) -> Self {
        self.alpha_data = Some(Channel::Inline(alpha));
        self
    }

    pub fn with_visibility(mut self, visibility: Vec<f32>) -> Self {
        self.visibility_data = Some(Channel::Inline(visibility));
        self
    }

    /// Instance data with 2 (x, y) or 3 (x, y, packed) floats per instance.
    pub fn with_instances(mut self, data: Vec<f32>, count: usize) -> Self {
        self.instance_count = Some(count);
        self.instance_data = Some(Channel::Inline(data));
        self
    }

    /// Instances given as records; packed words are carried as float bits.
    pub fn with_instance_records(self, records: &[InstanceRecord]) -> Self {
        let data = records
            .iter()
            .flat_map(|r| [r.x, r.y, f32::from_bits(r.packed)])
            .collect();
        self.with_instances(data, records.len())
    }

    /// Decode all channels and check they agree with each other.
    ///
    /// `default_stride` applies when instance data comes without a count:
    /// 3 for rotated pads, 2 for vias.
    pub fn decode(self, default_stride: usize) -> Result<DecodedLod, PayloadError> {
        let vertices = self.vertex_data.decode("vertexData")?;
        let vertex_count = self.vertex_count;
        if vertices.len() != vertex_count * 2 {
            return Err(PayloadError::VertexCountMismatch {
                declared: vertex_count,
                floats: vertices.len(),
                expected: vertex_count * 2,
            });
        }

        let indices = match self.index_data {
            Some(channel) => {
                let mut indices = channel.decode("indexData")?;
                if let Some(count) = self.index_count {
                    if count > indices.len() {
                        return Err(PayloadError::ChannelLength {
                            channel: "indexData",
                            expected: count,
                            actual: indices.len(),
                        });
                    }
                    indices.truncate(count);
                    indices.shrink_to_fit();
                }
                if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
                    return Err(PayloadError::IndexOutOfRange {
                        index: bad,
                        vertex_count,
                    });
                }
                Some(indices)
            }
            None => None,
        };

        let alpha = per_vertex_or(self.alpha_data, "alphaData", vertex_count, 1.0)?;
        let visibility = per_vertex_or(self.visibility_data, "visibilityData", vertex_count, 1.0)?;

        let instances = match self.instance_data {
            Some(channel) => {
                let data = channel.decode("instanceData")?;
                split_instances(&data, self.instance_count, default_stride)?
            }
            None => Vec::new(),
        };

        log::trace!(
            "decoded LOD: {} vertices, {} indices, {} instances",
            vertex_count,
            indices.as_ref().map_or(0, Vec::len),
            instances.len()
        );

        Ok(DecodedLod {
            vertices,
            vertex_count,
            indices,
            alpha,
            visibility,
            instances,
        })
    }
}

fn per_vertex_or(
    channel: Option<Channel<f32>>,
    name: &'static str,
    vertex_count: usize,
    default: f32,
) -> Result<Vec<f32>, PayloadError> {
    match channel {
        Some(channel) => {
            let values = channel.decode(name)?;
            if values.len() != vertex_count {
                return Err(PayloadError::ChannelLength {
                    channel: name,
                    expected: vertex_count,
                    actual: values.len(),
                });
            }
            Ok(values)
        }
        None => Ok(vec![default; vertex_count]),
    }
}

fn split_instances(
    data: &[f32],
    count: Option<usize>,
    default_stride: usize,
) -> Result<Vec<InstanceRecord>, PayloadError> {
    let stride = match count {
        Some(0) if data.is_empty() => return Ok(Vec::new()),
        Some(count) if count > 0 && data.len() % count == 0 => data.len() / count,
        Some(count) => {
            return Err(PayloadError::InstanceStride {
                floats: data.len(),
                count,
            })
        }
        None => default_stride,
    };
    if !(stride == 2 || stride == 3) || data.len() % stride != 0 {
        return Err(PayloadError::InstanceStride {
            floats: data.len(),
            count: count.unwrap_or(data.len() / stride.max(1)),
        });
    }
    Ok(data
        .chunks_exact(stride)
        .map(|c| {
            let packed = if stride == 3 { c[2].to_bits() } else { VISIBLE_BIT };
            InstanceRecord::new(c[0], c[1], packed)
        })
        .collect())
}

/// A fully decoded LOD level, ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLod {
    pub vertices: Vec<f32>,
    pub vertex_count: usize,
    pub indices: Option<Vec<u32>>,
    pub alpha: Vec<f32>,
    pub visibility: Vec<f32>,
    pub instances: Vec<InstanceRecord>,
}

/// Per-shader geometry lists of one layer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ShaderGeometry {
    #[serde(default)]
    pub batch: Option<Vec<LodPayload>>,
    #[serde(default)]
    pub batch_colored: Option<Vec<LodPayload>>,
    #[serde(default)]
    pub instanced_rot: Option<Vec<LodPayload>>,
    #[serde(default)]
    pub instanced: Option<Vec<LodPayload>>,
}

impl ShaderGeometry {
    pub fn slot_mut(&mut self, kind: EntityKind) -> &mut Option<Vec<LodPayload>> {
        match kind {
            EntityKind::Batch => &mut self.batch,
            EntityKind::BatchColored => &mut self.batch_colored,
            EntityKind::Instanced => &mut self.instanced,
            EntityKind::InstancedRot => &mut self.instanced_rot,
        }
    }

    /// Drain into `(kind, lods)` pairs, skipping absent variants.
    pub fn into_entries(mut self) -> Vec<(EntityKind, Vec<LodPayload>)> {
        EntityKind::ALL
            .into_iter()
            .filter_map(|kind| self.slot_mut(kind).take().map(|lods| (kind, lods)))
            .collect()
    }
}

fn default_color() -> Rgba {
    DEFAULT_LAYER_COLOR
}

/// Everything the renderer receives for one layer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerPayload {
    pub layer_id: String,
    pub layer_name: String,
    #[serde(default)]
    pub layer_function: Option<String>,
    #[serde(default = "default_color")]
    pub default_color: Rgba,
    #[serde(default)]
    pub geometry: ShaderGeometry,
}

impl LayerPayload {
    pub fn new(layer_id: &str, layer_name: &str, default_color: Rgba) -> Self {
        Self {
            layer_id: layer_id.to_string(),
            layer_name: layer_name.to_string(),
            layer_function: None,
            default_color,
            geometry: ShaderGeometry::default(),
        }
    }

    pub fn with_entity(mut self, kind: EntityKind, lods: Vec<LodPayload>) -> Self {
        *self.geometry.slot_mut(kind) = Some(lods);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
