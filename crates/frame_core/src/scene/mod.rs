//! Scene model consumed by the renderer
//!
//! The scene graph stores nodes with precomputed world transforms and a typed
//! role. [`SceneSnapshot`] flattens one graph walk into the tables the render
//! passes read every frame.

mod camera;
mod graph;
mod light;
mod material;
mod mesh;
mod snapshot;

pub use camera::Camera;
pub use graph::{MeshInstance, Node, NodeKey, NodeRole, SceneGraph};
pub use light::{Attenuation, DirectionalLight, Environment, PointLight, SpotLight};
pub use material::{image_identity, CullMode, ImageHandle, Material, SampledImage};
pub use mesh::{Mesh, MeshBuffers, MeshData, Surface, Vertex};
pub use snapshot::{
    ImageTable, InstanceEntry, PunctualLight, PunctualLightKind, SceneSnapshot, Selected,
    ShadowCaster, SurfaceEntry, NO_IMAGE,
};
