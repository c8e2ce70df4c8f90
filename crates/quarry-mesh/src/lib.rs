//! Block models and per-face chunk meshing.
//!
//! The mesher visits every block in a chunk, decides face visibility
//! against the six neighbors (including across chunk boundaries through a
//! [`BlockProbe`](quarry_core::BlockProbe)), and emits quads into one
//! vertex/index stream per render layer.

pub mod atlas;
pub mod mesher;
pub mod model;
pub mod vertex;

pub use atlas::{TextureAtlas, TextureRegion};
pub use mesher::{mesh_chunk, BlockCatalog, MeshData, MesherConfig};
pub use model::{BlockModel, Element, ModelFace, ModelId, ModelStore, VariantKey};
pub use vertex::Vertex;
