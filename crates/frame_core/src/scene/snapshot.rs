//! # Scene Snapshot
//!
//! One depth-first walk of the scene graph flattened into the tables the
//! render passes consume every frame: the selected camera, directional light
//! and environment, the punctual light list, the drawable mesh instances and
//! a deduplicated image table with dense indices.
//!
//! A snapshot is immutable. Structural edits made to the graph after it was
//! built are not reflected until the scene is loaded again; only world
//! transforms are re-read per frame through the stored node keys.

use super::{
    image_identity, Camera, DirectionalLight, Environment, ImageHandle, Mesh, NodeKey, NodeRole,
    PointLight, SceneGraph, SpotLight,
};
use crate::render::{RenderError, RenderResult};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Index value meaning "no texture"
pub const NO_IMAGE: i32 = -1;

/// A first-found scene role together with the node that carries it
#[derive(Debug, Clone, Copy)]
pub struct Selected<T> {
    /// Node carrying the role
    pub node: NodeKey,
    /// Role parameters at load time
    pub value: T,
}

/// Deduplicated set of images referenced by materials
///
/// Images are keyed by handle identity; indices are dense, assigned in
/// discovery order, and stable for the lifetime of the table.
#[derive(Default, Clone)]
pub struct ImageTable {
    images: Vec<ImageHandle>,
    index_by_identity: HashMap<usize, u32>,
}

impl ImageTable {
    /// Index of `image`, inserting it if unseen
    pub fn insert(&mut self, image: &ImageHandle) -> u32 {
        let identity = image_identity(image);
        if let Some(index) = self.index_by_identity.get(&identity) {
            return *index;
        }

        let index = self.images.len() as u32;
        self.images.push(Arc::clone(image));
        self.index_by_identity.insert(identity, index);
        index
    }

    /// Index of `image` if present
    pub fn index_of(&self, image: &ImageHandle) -> Option<u32> {
        self.index_by_identity.get(&image_identity(image)).copied()
    }

    /// Images in index order
    pub fn images(&self) -> &[ImageHandle] {
        &self.images
    }

    /// Number of distinct images
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether no image was referenced
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Per-surface indices resolved at load time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceEntry {
    /// Index into the image table, or `NO_IMAGE`
    pub albedo_index: i32,
    /// Index into the image table, or `NO_IMAGE`
    pub specular_index: i32,
    /// Element of the per-surface uniform region
    pub surface_slot: u32,
}

/// A drawable mesh instance
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    /// Node carrying the instance
    pub node: NodeKey,
    /// Mesh with built GPU buffers
    pub mesh: Arc<Mesh>,
    /// Element of the per-model uniform region
    pub model_slot: u32,
    /// One entry per mesh surface, same order
    pub surfaces: Vec<SurfaceEntry>,
}

/// Point or spot light parameters
#[derive(Debug, Clone, Copy)]
pub enum PunctualLightKind {
    /// Point light
    Point(PointLight),
    /// Spot light
    Spot(SpotLight),
}

/// Entry of the light array
#[derive(Debug, Clone, Copy)]
pub struct PunctualLight {
    /// Node carrying the light
    pub node: NodeKey,
    /// Light parameters
    pub kind: PunctualLightKind,
}

/// Light rendered into the shadow map
#[derive(Debug, Clone, Copy)]
pub enum ShadowCaster {
    /// The selected directional light
    Directional(Selected<DirectionalLight>),
    /// The first spot light
    Spot {
        /// Node carrying the light
        node: NodeKey,
        /// Light parameters
        light: SpotLight,
    },
}

/// Flattened scene tables
#[derive(Default, Clone)]
pub struct SceneSnapshot {
    camera: Option<Selected<Camera>>,
    directional_light: Option<Selected<DirectionalLight>>,
    environment: Option<Selected<Environment>>,
    lights: Vec<PunctualLight>,
    instances: Vec<InstanceEntry>,
    images: ImageTable,
    surface_count: u32,
}

impl SceneSnapshot {
    /// Snapshot of nothing; every pass no-ops on it
    pub fn empty() -> Self {
        Self::default()
    }

    /// Walk the graph below `root` once and build the tables
    pub fn build(graph: &SceneGraph, root: NodeKey) -> RenderResult<Self> {
        if graph.get(root).is_none() {
            return Err(RenderError::UnknownNode);
        }

        let mut snapshot = Self::default();

        for key in graph.depth_first(root) {
            let Some(node) = graph.get(key) else {
                continue;
            };

            match &node.role {
                NodeRole::Group => {}
                NodeRole::Camera(camera) => {
                    select_first(&mut snapshot.camera, key, *camera, &node.name, "camera");
                }
                NodeRole::DirectionalLight(light) => {
                    select_first(&mut snapshot.directional_light, key, *light, &node.name, "directional light");
                }
                NodeRole::Environment(environment) => {
                    select_first(&mut snapshot.environment, key, *environment, &node.name, "environment");
                }
                NodeRole::PointLight(light) => snapshot.lights.push(PunctualLight {
                    node: key,
                    kind: PunctualLightKind::Point(*light),
                }),
                NodeRole::SpotLight(light) => snapshot.lights.push(PunctualLight {
                    node: key,
                    kind: PunctualLightKind::Spot(*light),
                }),
                NodeRole::MeshInstance(instance) => {
                    if !instance.mesh.is_built() {
                        warn!("Mesh instance '{}' has no GPU buffers, skipping", node.name);
                        continue;
                    }
                    snapshot.push_instance(key, Arc::clone(&instance.mesh));
                }
            }
        }

        info!(
            "Scene loaded: {} instances, {} surfaces, {} lights, {} images, camera: {}",
            snapshot.instances.len(),
            snapshot.surface_count,
            snapshot.lights.len(),
            snapshot.images.len(),
            snapshot.camera.is_some()
        );

        Ok(snapshot)
    }

    fn push_instance(&mut self, node: NodeKey, mesh: Arc<Mesh>) {
        let mut surfaces = Vec::with_capacity(mesh.surfaces.len());

        for surface in &mesh.surfaces {
            let albedo_index = surface
                .material
                .albedo_image
                .as_ref()
                .map_or(NO_IMAGE, |image| self.images.insert(image) as i32);
            let specular_index = surface
                .material
                .specular_image
                .as_ref()
                .map_or(NO_IMAGE, |image| self.images.insert(image) as i32);

            surfaces.push(SurfaceEntry {
                albedo_index,
                specular_index,
                surface_slot: self.surface_count,
            });
            self.surface_count += 1;
        }

        debug!("Instance slot {} with {} surfaces", self.instances.len(), surfaces.len());

        self.instances.push(InstanceEntry {
            node,
            mesh,
            model_slot: self.instances.len() as u32,
            surfaces,
        });
    }

    /// Selected camera
    pub fn camera(&self) -> Option<&Selected<Camera>> {
        self.camera.as_ref()
    }

    /// Selected directional light
    pub fn directional_light(&self) -> Option<&Selected<DirectionalLight>> {
        self.directional_light.as_ref()
    }

    /// Selected environment
    pub fn environment(&self) -> Option<&Selected<Environment>> {
        self.environment.as_ref()
    }

    /// Point and spot lights in discovery order
    pub fn lights(&self) -> &[PunctualLight] {
        &self.lights
    }

    /// Drawable mesh instances in discovery order
    pub fn instances(&self) -> &[InstanceEntry] {
        &self.instances
    }

    /// Deduplicated image table
    pub fn images(&self) -> &ImageTable {
        &self.images
    }

    /// Surfaces across all drawable instances
    pub fn surface_count(&self) -> u32 {
        self.surface_count
    }

    /// Number of point and spot lights
    pub fn light_count(&self) -> u32 {
        self.lights.len() as u32
    }

    /// Element count of the light array region; never zero
    pub fn light_region_len(&self) -> u32 {
        self.light_count().max(1)
    }

    /// Element count of the per-model region; never zero
    pub fn model_region_len(&self) -> u32 {
        (self.instances.len() as u32).max(1)
    }

    /// Element count of the per-surface region; never zero
    pub fn surface_region_len(&self) -> u32 {
        self.surface_count.max(1)
    }

    /// Element count of the image array binding; never zero
    pub fn image_array_len(&self) -> u32 {
        (self.images.len() as u32).max(1)
    }

    /// Whether anything can be drawn
    pub fn has_drawables(&self) -> bool {
        !self.instances.is_empty()
    }

    /// Light that renders the shadow map: the directional light, else the first spot light
    pub fn shadow_caster(&self) -> Option<ShadowCaster> {
        if let Some(directional) = self.directional_light {
            return Some(ShadowCaster::Directional(directional));
        }

        self.lights.iter().find_map(|light| match light.kind {
            PunctualLightKind::Spot(spot) => Some(ShadowCaster::Spot {
                node: light.node,
                light: spot,
            }),
            PunctualLightKind::Point(_) => None,
        })
    }
}

fn select_first<T: Copy>(slot: &mut Option<Selected<T>>, node: NodeKey, value: T, name: &str, role: &str) {
    match slot {
        Some(_) => warn!("Ignoring additional {} '{}'; only the first one is used", role, name),
        None => {
            warn!("Using {} '{}' (first found)", role, name);
            *slot = Some(Selected { node, value });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3, Vec4};
    use crate::scene::{Material, MeshInstance, Surface};
    use crate::testing::{built_mesh, mock_image};

    fn add(graph: &mut SceneGraph, name: &str, role: NodeRole) -> NodeKey {
        let root = graph.root();
        graph.add_child(root, name, role, Mat4::identity()).unwrap()
    }

    #[test]
    fn test_empty_graph_gives_empty_tables() {
        let graph = SceneGraph::new();
        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert!(snapshot.camera().is_none());
        assert!(!snapshot.has_drawables());
        assert_eq!(snapshot.light_count(), 0);
        assert_eq!(snapshot.light_region_len(), 1);
        assert_eq!(snapshot.image_array_len(), 1);
        assert!(snapshot.shadow_caster().is_none());
    }

    #[test]
    fn test_first_camera_wins() {
        let mut graph = SceneGraph::new();
        let first = add(&mut graph, "main", NodeRole::Camera(Camera::default()));
        add(&mut graph, "other", NodeRole::Camera(Camera::perspective(90.0, 1.0, 10.0)));

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert_eq!(snapshot.camera().unwrap().node, first);
    }

    #[test]
    fn test_shared_image_gets_one_index() {
        let shared = mock_image();
        let red = Material::new(Vec4::new(1.0, 0.0, 0.0, 1.0)).with_albedo_image(Arc::clone(&shared));
        let blue = Material::new(Vec4::new(0.0, 0.0, 1.0, 1.0)).with_albedo_image(Arc::clone(&shared));
        let mesh = built_mesh(vec![red, blue]);

        let mut graph = SceneGraph::new();
        add(&mut graph, "mesh", NodeRole::MeshInstance(MeshInstance::new(mesh)));

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert_eq!(snapshot.images().len(), 1);
        let surfaces = &snapshot.instances()[0].surfaces;
        assert_eq!(surfaces[0].albedo_index, 0);
        assert_eq!(surfaces[1].albedo_index, 0);
        assert_eq!(snapshot.images().index_of(&shared), Some(0));
        assert_eq!(snapshot.images().index_of(&shared), Some(0));
    }

    #[test]
    fn test_distinct_images_get_distinct_dense_indices() {
        let a = mock_image();
        let b = mock_image();
        let c = mock_image();
        let mesh_one = built_mesh(vec![Material::default()
            .with_albedo_image(Arc::clone(&a))
            .with_specular_image(Arc::clone(&b))]);
        let mesh_two = built_mesh(vec![
            Material::default().with_albedo_image(Arc::clone(&c)),
            Material::default().with_albedo_image(Arc::clone(&a)),
        ]);

        let mut graph = SceneGraph::new();
        add(&mut graph, "one", NodeRole::MeshInstance(MeshInstance::new(mesh_one)));
        add(&mut graph, "two", NodeRole::MeshInstance(MeshInstance::new(mesh_two)));

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        let table = snapshot.images();
        assert_eq!(table.len(), 3);

        let mut indices: Vec<u32> = [&a, &b, &c].iter().map(|img| table.index_of(img).unwrap()).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);

        let second = &snapshot.instances()[1].surfaces;
        assert_eq!(second[1].albedo_index, table.index_of(&a).unwrap() as i32);
        assert_eq!(second[0].specular_index, NO_IMAGE);
    }

    #[test]
    fn test_unbuilt_meshes_are_skipped() {
        let unbuilt = Arc::new(Mesh::new(vec![Surface {
            first_index: 0,
            index_count: 3,
            material: Material::default(),
        }]));
        let built = built_mesh(vec![Material::default(), Material::default()]);

        let mut graph = SceneGraph::new();
        add(&mut graph, "pending", NodeRole::MeshInstance(MeshInstance::new(unbuilt)));
        let drawn = add(&mut graph, "ready", NodeRole::MeshInstance(MeshInstance::new(built)));

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert_eq!(snapshot.instances().len(), 1);
        assert_eq!(snapshot.instances()[0].node, drawn);
        assert_eq!(snapshot.surface_count(), 2);
        assert_eq!(snapshot.instances()[0].surfaces[1].surface_slot, 1);
    }

    #[test]
    fn test_shadow_caster_prefers_directional() {
        let mut graph = SceneGraph::new();
        add(
            &mut graph,
            "spot",
            NodeRole::SpotLight(SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 15.0, 25.0)),
        );
        let sun = add(
            &mut graph,
            "sun",
            NodeRole::DirectionalLight(DirectionalLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0)),
        );

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert!(matches!(snapshot.shadow_caster(), Some(ShadowCaster::Directional(s)) if s.node == sun));
        assert_eq!(snapshot.light_count(), 1);
    }

    #[test]
    fn test_spot_light_casts_without_directional() {
        let mut graph = SceneGraph::new();
        add(&mut graph, "bulb", NodeRole::PointLight(PointLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0)));
        let spot = add(
            &mut graph,
            "spot",
            NodeRole::SpotLight(SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 15.0, 25.0)),
        );

        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();
        assert!(matches!(snapshot.shadow_caster(), Some(ShadowCaster::Spot { node, .. }) if node == spot));
        assert_eq!(snapshot.light_region_len(), 2);
    }

    #[test]
    fn test_nodes_added_after_build_are_absent() {
        let mut graph = SceneGraph::new();
        add(&mut graph, "first", NodeRole::MeshInstance(MeshInstance::new(built_mesh(vec![Material::default()]))));
        let snapshot = SceneSnapshot::build(&graph, graph.root()).unwrap();

        add(&mut graph, "late", NodeRole::MeshInstance(MeshInstance::new(built_mesh(vec![Material::default()]))));
        assert_eq!(snapshot.instances().len(), 1);
        assert_eq!(SceneSnapshot::build(&graph, graph.root()).unwrap().instances().len(), 2);
    }
}
