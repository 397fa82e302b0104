//! # Uniform Layouts
//!
//! GPU-visible records and the region layout that packs them into
//! dynamically offset buffers. Field order is a binary contract with the
//! shaders in `resources/shaders`; every struct is `#[repr(C)]` with explicit
//! padding so it matches std140 (uniform buffers) and std430 (the light
//! storage buffer).
//!
//! The `gather_*` functions are pure: they read the scene graph and the
//! snapshot and produce the records a pass writes for one frame.

use crate::foundation::math::{forward_of, normal_matrix, translation_of, Mat4, Vec3};
use crate::scene::{Camera, NodeKey, PunctualLightKind, SceneGraph, SceneSnapshot, ShadowCaster};

/// Base alignment of a std430 struct made of `vec4`/`mat4` members
pub const STD430_STRUCT_ALIGNMENT: u64 = 16;

/// How shaders address the records of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    /// Uniform records selected with a dynamic offset
    Uniform,
    /// A std430 array in a storage buffer bound whole
    StorageArray,
}

/// Round `size` up to a multiple of `alignment` (0 or 1 means unaligned)
pub fn aligned_stride(size: u64, alignment: u64) -> u64 {
    if alignment <= 1 {
        return size;
    }
    size.div_ceil(alignment) * alignment
}

/// Layout of an array of records inside one buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionLayout {
    /// Size of one record
    pub element_size: u64,
    /// Number of records
    pub count: u32,
    /// Required offset alignment
    pub alignment: u64,
    /// Distance between consecutive records
    pub stride: u64,
    /// Total bytes
    pub size: u64,
}

impl RegionLayout {
    /// Layout for `count` records of `element_size` bytes
    ///
    /// `count` is raised to one so no region is ever zero-sized.
    pub fn new(element_size: u64, count: u32, alignment: u64) -> Self {
        let count = count.max(1);
        let stride = aligned_stride(element_size, alignment);
        Self {
            element_size,
            count,
            alignment,
            stride,
            size: stride * count as u64,
        }
    }

    /// Layout for `count` records of `T`
    pub fn of<T>(count: u32, alignment: u64) -> Self {
        Self::new(std::mem::size_of::<T>() as u64, count, alignment)
    }

    /// Layout for `count` records of `T` addressed as `kind`
    ///
    /// Uniform records are spaced by the device's dynamic offset alignment.
    /// Storage arrays are indexed in the shader, so their stride is the
    /// std430 array stride whatever the device reports.
    pub fn for_kind<T>(kind: RegionKind, count: u32, device_alignment: u64) -> Self {
        match kind {
            RegionKind::Uniform => Self::of::<T>(count, device_alignment),
            RegionKind::StorageArray => Self::of::<T>(count, STD430_STRUCT_ALIGNMENT),
        }
    }

    /// Byte offset of record `index`
    pub fn offset_of(&self, index: u32) -> u64 {
        self.stride * index as u64
    }

    /// Dynamic descriptor offset of record `index`
    pub fn dynamic_offset(&self, index: u32) -> u32 {
        self.offset_of(index) as u32
    }
}

/// Column-major matrix as laid out in GLSL
pub type GpuMat4 = [[f32; 4]; 4];

/// Convert to the GLSL layout
pub fn gpu_mat(m: &Mat4) -> GpuMat4 {
    (*m).into()
}

fn vec4(v: Vec3, w: f32) -> [f32; 4] {
    [v.x, v.y, v.z, w]
}

/// Global per-frame record (set 0, binding 0)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlobalUniform {
    /// Camera projection
    pub projection: GpuMat4,
    /// Camera view
    pub view: GpuMat4,
    /// Camera projection times view, the only matrix positions go through
    pub view_projection: GpuMat4,
    /// Premultiplied ambient color, w unused
    pub ambient: [f32; 4],
    /// Camera world position, w = 1
    pub camera_position: [f32; 4],
    /// Direction the directional light travels, w unused
    pub directional_direction: [f32; 4],
    /// Directional color times intensity, w unused
    pub directional_color: [f32; 4],
    /// Directional specular color, w unused
    pub directional_specular: [f32; 4],
    /// Non-zero if a directional light is active
    pub have_directional_light: u32,
    /// Number of valid entries in the light array
    pub light_count: u32,
    /// Non-zero if the shadow map is bound and valid
    pub shadow_enabled: u32,
    /// Light array index of the shadow caster, -1 for the directional light
    pub shadow_light: i32,
    /// World to shadow-map clip space
    pub light_space: GpuMat4,
}

unsafe impl bytemuck::Pod for GlobalUniform {}
unsafe impl bytemuck::Zeroable for GlobalUniform {}

/// Per-model record (set 0, binding 1, dynamic)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelUniform {
    /// World transform
    pub world: GpuMat4,
    /// Inverse-transpose of the world transform's upper 3x3
    pub normal: GpuMat4,
}

unsafe impl bytemuck::Pod for ModelUniform {}
unsafe impl bytemuck::Zeroable for ModelUniform {}

impl ModelUniform {
    /// Record for a world transform
    pub fn from_world(world: &Mat4) -> Self {
        Self {
            world: gpu_mat(world),
            normal: gpu_mat(&normal_matrix(world)),
        }
    }
}

/// Per-surface record (set 0, binding 2, dynamic)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceUniform {
    /// Albedo color
    pub albedo_color: [f32; 4],
    /// Index into the image array, -1 for none
    pub albedo_index: i32,
    /// Index into the image array, -1 for none
    pub specular_index: i32,
    /// Padding
    pub _padding: [i32; 2],
}

unsafe impl bytemuck::Pod for SurfaceUniform {}
unsafe impl bytemuck::Zeroable for SurfaceUniform {}

/// Light array element (set 0, binding 3, storage buffer)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightUniform {
    /// World position, w unused
    pub position: [f32; 4],
    /// Color, w = intensity
    pub color: [f32; 4],
    /// Specular color, w unused
    pub specular: [f32; 4],
    /// Constant, linear, quadratic attenuation, w unused
    pub attenuation: [f32; 4],
    /// Spot direction, w unused
    pub direction: [f32; 4],
    /// cos(inner), cos(outer), spot flag, unused
    pub cone: [f32; 4],
}

unsafe impl bytemuck::Pod for LightUniform {}
unsafe impl bytemuck::Zeroable for LightUniform {}

/// Camera view-projection for this frame, or `None` without a live camera
///
/// The scene pass and the depth pre-pass both take their clip transform from
/// here so the depth they produce is bit-identical.
pub fn camera_view_projection(graph: &SceneGraph, snapshot: &SceneSnapshot, aspect: f32) -> Option<Mat4> {
    let camera = snapshot.camera()?;
    let node = graph.get(camera.node)?;
    Some(camera.value.projection(aspect) * Camera::view(&node.world_transform))
}

/// Index of `node`'s record in the array [`gather_lights`] builds
pub fn packed_light_index(graph: &SceneGraph, snapshot: &SceneSnapshot, node: NodeKey) -> Option<u32> {
    snapshot
        .lights()
        .iter()
        .filter(|light| graph.get(light.node).is_some())
        .position(|light| light.node == node)
        .map(|index| index as u32)
}

/// Build the global record
///
/// `shadow` is the caster and its light-space matrix when a shadow map is
/// bound. A spot caster whose node is gone disables shadowing. Without a
/// camera the matrices are identity; the scene pass does not draw in that
/// case anyway.
pub fn gather_global(
    graph: &SceneGraph,
    snapshot: &SceneSnapshot,
    aspect: f32,
    light_count: u32,
    shadow: Option<(&ShadowCaster, Mat4)>,
) -> GlobalUniform {
    let shadow = shadow.and_then(|(caster, light_space)| {
        let index = match caster {
            ShadowCaster::Directional(_) => -1,
            ShadowCaster::Spot { node, .. } => packed_light_index(graph, snapshot, *node)? as i32,
        };
        Some((index, light_space))
    });

    let mut global = GlobalUniform {
        projection: gpu_mat(&Mat4::identity()),
        view: gpu_mat(&Mat4::identity()),
        view_projection: gpu_mat(&Mat4::identity()),
        ambient: [0.0; 4],
        camera_position: [0.0, 0.0, 0.0, 1.0],
        directional_direction: [0.0, -1.0, 0.0, 0.0],
        directional_color: [0.0; 4],
        directional_specular: [0.0; 4],
        have_directional_light: 0,
        light_count,
        shadow_enabled: shadow.is_some() as u32,
        shadow_light: shadow.map_or(-1, |(index, _)| index),
        light_space: gpu_mat(&shadow.map_or_else(Mat4::identity, |(_, light_space)| light_space)),
    };

    if let Some(camera) = snapshot.camera() {
        if let Some(node) = graph.get(camera.node) {
            global.projection = gpu_mat(&camera.value.projection(aspect));
            global.view = gpu_mat(&Camera::view(&node.world_transform));
            global.camera_position = vec4(translation_of(&node.world_transform), 1.0);
        }
    }
    if let Some(view_projection) = camera_view_projection(graph, snapshot, aspect) {
        global.view_projection = gpu_mat(&view_projection);
    }

    if let Some(environment) = snapshot.environment() {
        global.ambient = vec4(environment.value.ambient(), 0.0);
    }

    if let Some(directional) = snapshot.directional_light() {
        if let Some(node) = graph.get(directional.node) {
            let light = &directional.value;
            global.directional_direction = vec4(forward_of(&node.world_transform), 0.0);
            global.directional_color = vec4(light.color * light.intensity, 0.0);
            global.directional_specular = vec4(light.specular, 0.0);
            global.have_directional_light = 1;
        }
    }

    global
}

/// Per-model records as `(model_slot, record)`, skipping removed nodes
pub fn gather_models(graph: &SceneGraph, snapshot: &SceneSnapshot) -> Vec<(u32, ModelUniform)> {
    snapshot
        .instances()
        .iter()
        .filter_map(|instance| {
            graph
                .get(instance.node)
                .map(|node| (instance.model_slot, ModelUniform::from_world(&node.world_transform)))
        })
        .collect()
}

/// Per-surface records indexed by surface slot
pub fn gather_surfaces(snapshot: &SceneSnapshot) -> Vec<SurfaceUniform> {
    let mut surfaces = Vec::with_capacity(snapshot.surface_count() as usize);

    for instance in snapshot.instances() {
        for (surface, entry) in instance.mesh.surfaces.iter().zip(&instance.surfaces) {
            let color = surface.material.albedo_color;
            surfaces.push(SurfaceUniform {
                albedo_color: [color.x, color.y, color.z, color.w],
                albedo_index: entry.albedo_index,
                specular_index: entry.specular_index,
                _padding: [0; 2],
            });
        }
    }

    surfaces
}

/// Light array, skipping removed nodes
pub fn gather_lights(graph: &SceneGraph, snapshot: &SceneSnapshot) -> Vec<LightUniform> {
    snapshot
        .lights()
        .iter()
        .filter_map(|light| {
            let node = graph.get(light.node)?;
            let position = vec4(translation_of(&node.world_transform), 1.0);

            let record = match light.kind {
                PunctualLightKind::Point(point) => LightUniform {
                    position,
                    color: vec4(point.color, point.intensity),
                    specular: vec4(point.specular, 0.0),
                    attenuation: [
                        point.attenuation.constant,
                        point.attenuation.linear,
                        point.attenuation.quadratic,
                        0.0,
                    ],
                    direction: [0.0, 0.0, -1.0, 0.0],
                    cone: [-1.0, -1.0, 0.0, 0.0],
                },
                PunctualLightKind::Spot(spot) => LightUniform {
                    position,
                    color: vec4(spot.color, spot.intensity),
                    specular: vec4(spot.specular, 0.0),
                    attenuation: [
                        spot.attenuation.constant,
                        spot.attenuation.linear,
                        spot.attenuation.quadratic,
                        0.0,
                    ],
                    direction: vec4(forward_of(&node.world_transform), 0.0),
                    cone: [spot.cos_inner(), spot.cos_outer(), 1.0, 0.0],
                },
            };
            Some(record)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{
        DirectionalLight, Environment, Material, MeshInstance, NodeRole, PointLight, SpotLight,
    };
    use crate::testing::built_mesh;
    use approx::assert_relative_eq;

    #[test]
    fn test_region_layout_invariants() {
        for element_size in [4u64, 16, 32, 96, 128, 288, 300] {
            for alignment in [1u64, 4, 16, 64, 256] {
                for count in [0u32, 1, 3, 17] {
                    let region = RegionLayout::new(element_size, count, alignment);
                    assert!(region.stride >= region.element_size);
                    assert_eq!(region.stride % alignment, 0);
                    assert!(region.stride * region.count as u64 <= region.size);
                    assert!(region.count >= 1);
                }
            }
        }
    }

    #[test]
    fn test_dynamic_offsets_are_aligned() {
        let region = RegionLayout::of::<SurfaceUniform>(5, 256);
        assert_eq!(region.stride, 256);
        assert_eq!(region.dynamic_offset(3), 768);
    }

    #[test]
    fn test_record_sizes_match_shader_layout() {
        assert_eq!(std::mem::size_of::<GlobalUniform>(), 352);
        assert_eq!(std::mem::size_of::<ModelUniform>(), 128);
        assert_eq!(std::mem::size_of::<SurfaceUniform>(), 32);
        assert_eq!(std::mem::size_of::<LightUniform>(), 96);
    }

    // Offsets below are the std140 block offsets of `Global`, `Model` and
    // `SurfaceData` and the std430 member offsets of `Light` in scene.vert
    // and scene.frag.

    #[test]
    fn test_global_offsets_match_std140() {
        let global: GlobalUniform = bytemuck::Zeroable::zeroed();
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, projection), 0);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, view), 64);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, view_projection), 128);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, ambient), 192);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, camera_position), 208);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, directional_direction), 224);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, directional_color), 240);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, directional_specular), 256);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, have_directional_light), 272);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, light_count), 276);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, shadow_enabled), 280);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, shadow_light), 284);
        assert_eq!(bytemuck::offset_of!(global, GlobalUniform, light_space), 288);
    }

    #[test]
    fn test_model_and_surface_offsets_match_std140() {
        let model: ModelUniform = bytemuck::Zeroable::zeroed();
        assert_eq!(bytemuck::offset_of!(model, ModelUniform, world), 0);
        assert_eq!(bytemuck::offset_of!(model, ModelUniform, normal), 64);

        let surface: SurfaceUniform = bytemuck::Zeroable::zeroed();
        assert_eq!(bytemuck::offset_of!(surface, SurfaceUniform, albedo_color), 0);
        assert_eq!(bytemuck::offset_of!(surface, SurfaceUniform, albedo_index), 16);
        assert_eq!(bytemuck::offset_of!(surface, SurfaceUniform, specular_index), 20);
        assert_eq!(bytemuck::offset_of!(surface, SurfaceUniform, _padding), 24);
    }

    #[test]
    fn test_light_offsets_match_std430() {
        let light: LightUniform = bytemuck::Zeroable::zeroed();
        assert_eq!(bytemuck::offset_of!(light, LightUniform, position), 0);
        assert_eq!(bytemuck::offset_of!(light, LightUniform, color), 16);
        assert_eq!(bytemuck::offset_of!(light, LightUniform, specular), 32);
        assert_eq!(bytemuck::offset_of!(light, LightUniform, attenuation), 48);
        assert_eq!(bytemuck::offset_of!(light, LightUniform, direction), 64);
        assert_eq!(bytemuck::offset_of!(light, LightUniform, cone), 80);
    }

    #[test]
    fn test_light_array_stride_ignores_device_alignment() {
        // std430 stride of `Light lights[]`
        const SHADER_STRIDE: u64 = 96;
        for device_alignment in [1u64, 16, 32, 64, 256] {
            let region = RegionLayout::for_kind::<LightUniform>(RegionKind::StorageArray, 3, device_alignment);
            assert_eq!(region.stride, SHADER_STRIDE);
            assert_eq!(region.offset_of(1), SHADER_STRIDE);
            assert_eq!(region.offset_of(2), 2 * SHADER_STRIDE);
            assert_eq!(region.size, 3 * SHADER_STRIDE);
        }
    }

    #[test]
    fn test_uniform_records_follow_device_alignment() {
        let region = RegionLayout::for_kind::<ModelUniform>(RegionKind::Uniform, 2, 256);
        assert_eq!(region.stride, 256);
        let region = RegionLayout::for_kind::<ModelUniform>(RegionKind::Uniform, 2, 64);
        assert_eq!(region.stride, 128);
    }

    fn lit_scene() -> (SceneGraph, SceneSnapshot) {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        graph
            .add_child(
                root,
                "sun",
                NodeRole::DirectionalLight(DirectionalLight::new(Vec3::new(1.0, 0.5, 0.25), 2.0)),
                Mat4::identity(),
            )
            .unwrap();
        graph
            .add_child(
                root,
                "sky",
                NodeRole::Environment(Environment {
                    ambient_color: Vec3::new(1.0, 1.0, 1.0),
                    ambient_intensity: 0.1,
                }),
                Mat4::identity(),
            )
            .unwrap();
        graph
            .add_child(
                root,
                "bulb",
                NodeRole::PointLight(PointLight::new(Vec3::new(1.0, 1.0, 1.0), 3.0)),
                Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0)),
            )
            .unwrap();
        graph
            .add_child(
                root,
                "spot",
                NodeRole::SpotLight(SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0, 20.0)),
                Mat4::identity(),
            )
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();
        (graph, snapshot)
    }

    #[test]
    fn test_global_reports_directional_light() {
        let (graph, snapshot) = lit_scene();
        let caster = snapshot.shadow_caster().unwrap();
        let global = gather_global(&graph, &snapshot, 1.0, 2, Some((&caster, Mat4::identity())));
        assert_eq!(global.have_directional_light, 1);
        assert_eq!(global.shadow_enabled, 1);
        assert_eq!(global.shadow_light, -1);
        assert_eq!(global.light_count, 2);
        assert_relative_eq!(global.directional_color[0], 2.0);
        assert_relative_eq!(global.directional_direction[2], -1.0);
        assert_relative_eq!(global.ambient[1], 0.1);
    }

    #[test]
    fn test_global_without_shadow_map() {
        let (graph, snapshot) = lit_scene();
        let global = gather_global(&graph, &snapshot, 1.0, 2, None);
        assert_eq!(global.shadow_enabled, 0);
        assert_eq!(global.shadow_light, -1);
        assert_eq!(global.light_space, gpu_mat(&Mat4::identity()));
    }

    fn spot_lit_scene() -> (SceneGraph, SceneSnapshot, NodeKey, NodeKey) {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let bulb = graph
            .add_child(
                root,
                "bulb",
                NodeRole::PointLight(PointLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0)),
                Mat4::identity(),
            )
            .unwrap();
        let spot = graph
            .add_child(
                root,
                "spot",
                NodeRole::SpotLight(SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 1.0, 10.0, 20.0)),
                Mat4::new_translation(&Vec3::new(0.0, 4.0, 0.0)),
            )
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();
        (graph, snapshot, bulb, spot)
    }

    #[test]
    fn test_spot_caster_shadows_its_light_record() {
        let (graph, snapshot, _, _) = spot_lit_scene();
        let caster = snapshot.shadow_caster().unwrap();
        let lights = gather_lights(&graph, &snapshot);
        let global = gather_global(&graph, &snapshot, 1.0, lights.len() as u32, Some((&caster, Mat4::identity())));

        assert_eq!(global.have_directional_light, 0);
        assert_eq!(global.shadow_enabled, 1);
        assert_eq!(global.shadow_light, 1);
        assert_eq!(lights[global.shadow_light as usize].cone[2], 1.0);
        assert_eq!(lights[global.shadow_light as usize].position, [0.0, 4.0, 0.0, 1.0]);
    }

    #[test]
    fn test_spot_caster_index_tracks_removed_lights() {
        let (mut graph, snapshot, bulb, spot) = spot_lit_scene();
        let caster = snapshot.shadow_caster().unwrap();

        graph.remove(bulb).unwrap();
        let global = gather_global(&graph, &snapshot, 1.0, 1, Some((&caster, Mat4::identity())));
        assert_eq!(global.shadow_light, 0);
        assert_eq!(gather_lights(&graph, &snapshot)[0].cone[2], 1.0);

        graph.remove(spot).unwrap();
        let global = gather_global(&graph, &snapshot, 1.0, 0, Some((&caster, Mat4::identity())));
        assert_eq!(global.shadow_enabled, 0);
        assert_eq!(packed_light_index(&graph, &snapshot, spot), None);
    }

    #[test]
    fn test_global_view_projection_is_camera_clip_transform() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        graph
            .add_child(
                root,
                "camera",
                NodeRole::Camera(Camera::default()),
                Mat4::new_translation(&Vec3::new(0.5, 1.0, 6.0)),
            )
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();

        let global = gather_global(&graph, &snapshot, 1.6, 0, None);
        let view_projection = camera_view_projection(&graph, &snapshot, 1.6).unwrap();
        // Exact equality: the depth pre-pass pushes this same matrix
        assert_eq!(global.view_projection, gpu_mat(&view_projection));
        assert_relative_eq!(
            view_projection,
            Camera::default().projection(1.6) * Camera::view(&Mat4::new_translation(&Vec3::new(0.5, 1.0, 6.0))),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_lights_pack_point_and_spot() {
        let (graph, snapshot) = lit_scene();
        let lights = gather_lights(&graph, &snapshot);
        assert_eq!(lights.len(), 2);
        assert_eq!(lights[0].position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(lights[0].cone[2], 0.0);
        assert_eq!(lights[1].cone[2], 1.0);
        assert!(lights[1].cone[0] > lights[1].cone[1]);
    }

    #[test]
    fn test_removed_nodes_are_skipped_per_frame() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let mesh = built_mesh(vec![Material::default()]);
        let kept = graph
            .add_child(root, "kept", NodeRole::MeshInstance(MeshInstance::new(mesh.clone())), Mat4::identity())
            .unwrap();
        let gone = graph
            .add_child(root, "gone", NodeRole::MeshInstance(MeshInstance::new(mesh)), Mat4::identity())
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();

        graph.remove(gone).unwrap();
        let models = gather_models(&graph, &snapshot);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].0, snapshot.instances().iter().find(|i| i.node == kept).unwrap().model_slot);
        assert_eq!(gather_surfaces(&snapshot).len(), 2);
    }
}
