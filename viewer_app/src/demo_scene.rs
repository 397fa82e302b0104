//! Procedural demo scene: a textured floor, a spinning cube and three lights

use frame_core::foundation::math::{look_at_rh, Mat4, Vec3, Vec4};
use frame_core::render::{FrameRenderer, RenderResult};
use frame_core::scene::{
    Camera, CullMode, DirectionalLight, Environment, Material, Mesh, MeshData, MeshInstance, NodeKey,
    NodeRole, PointLight, SceneGraph, SpotLight, Surface, Vertex,
};
use std::sync::Arc;

const CHECKER_SIZE: u32 = 64;

/// Graph plus the nodes the viewer animates
pub struct DemoScene {
    pub graph: SceneGraph,
    pub cube: NodeKey,
}

impl DemoScene {
    pub fn build(renderer: &FrameRenderer) -> RenderResult<Self> {
        let mut graph = SceneGraph::new();
        let root = graph.root();

        let checker = renderer.upload_texture(CHECKER_SIZE, CHECKER_SIZE, &checker_pixels(CHECKER_SIZE))?;
        let floor_material = Material::new(Vec4::new(0.8, 0.8, 0.8, 1.0)).with_albedo_image(checker);
        let floor = upload(renderer, plane(10.0), floor_material.with_cull_mode(CullMode::None))?;

        let cube_material = Material::new(Vec4::new(0.9, 0.35, 0.2, 1.0));
        let cube_mesh = upload(renderer, cube(1.0), cube_material)?;

        graph.add_child(
            root,
            "camera",
            NodeRole::Camera(Camera::perspective(50.0, 0.1, 100.0)),
            placed_at(Vec3::new(4.0, 3.0, 6.0), Vec3::new(0.0, 0.5, 0.0)),
        )?;
        graph.add_child(
            root,
            "environment",
            NodeRole::Environment(Environment::default()),
            Mat4::identity(),
        )?;
        graph.add_child(
            root,
            "sun",
            NodeRole::DirectionalLight(DirectionalLight::new(Vec3::new(1.0, 0.95, 0.85), 2.5)),
            placed_at(Vec3::new(-3.0, 6.0, 2.0), Vec3::zeros()),
        )?;
        graph.add_child(
            root,
            "fill",
            NodeRole::PointLight(PointLight::new(Vec3::new(0.3, 0.5, 1.0), 4.0)),
            Mat4::new_translation(&Vec3::new(2.0, 1.5, -2.0)),
        )?;
        graph.add_child(
            root,
            "spot",
            NodeRole::SpotLight(SpotLight::new(Vec3::new(1.0, 1.0, 1.0), 8.0, 15.0, 25.0)),
            placed_at(Vec3::new(0.0, 5.0, 0.0), Vec3::zeros()),
        )?;

        graph.add_child(root, "floor", NodeRole::MeshInstance(MeshInstance::new(floor)), Mat4::identity())?;
        let cube = graph.add_child(
            root,
            "cube",
            NodeRole::MeshInstance(MeshInstance::new(cube_mesh)),
            Mat4::new_translation(&Vec3::new(0.0, 1.0, 0.0)),
        )?;

        Ok(Self { graph, cube })
    }

    /// Spin the cube to `angle` radians about +Y
    pub fn animate(&mut self, angle: f32) -> RenderResult<()> {
        let transform = Mat4::new_translation(&Vec3::new(0.0, 1.0, 0.0)) * Mat4::new_rotation(Vec3::y() * angle);
        self.graph.set_world_transform(self.cube, transform)
    }
}

/// World transform of a node at `eye` whose -Z axis faces `target`
fn placed_at(eye: Vec3, target: Vec3) -> Mat4 {
    look_at_rh(&eye, &target, &Vec3::y())
        .try_inverse()
        .unwrap_or_else(Mat4::identity)
}

fn upload(renderer: &FrameRenderer, data: MeshData, material: Material) -> RenderResult<Arc<Mesh>> {
    let surface = Surface {
        first_index: 0,
        index_count: data.indices.len() as u32,
        material,
    };
    let buffers = renderer.upload_mesh(&data)?;
    Ok(Arc::new(Mesh::new(vec![surface]).with_buffers(buffers)))
}

fn plane(size: f32) -> MeshData {
    let half = size * 0.5;
    let normal = [0.0, 1.0, 0.0];
    MeshData {
        vertices: vec![
            Vertex::new([-half, 0.0, half], normal, [0.0, size]),
            Vertex::new([half, 0.0, half], normal, [size, size]),
            Vertex::new([half, 0.0, -half], normal, [size, 0.0]),
            Vertex::new([-half, 0.0, -half], normal, [0.0, 0.0]),
        ],
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

fn cube(size: f32) -> MeshData {
    let half = size * 0.5;
    // (normal, u, v) with u x v = normal, so every face winds counter-clockwise from outside
    let faces = [
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
    ];

    let mut data = MeshData::default();
    for (normal, u, v) in faces {
        let base = data.vertices.len() as u32;
        let center = normal * half;
        for (du, dv, uv) in [(-1.0, -1.0, [0.0, 1.0]), (1.0, -1.0, [1.0, 1.0]), (1.0, 1.0, [1.0, 0.0]), (-1.0, 1.0, [0.0, 0.0])] {
            let p = center + u * (du * half) + v * (dv * half);
            data.vertices.push(Vertex::new([p.x, p.y, p.z], [normal.x, normal.y, normal.z], uv));
        }
        data.indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    data
}

fn checker_pixels(size: u32) -> Vec<u8> {
    let cell = (size / 8).max(1);
    (0..size * size)
        .flat_map(|i| {
            let (x, y) = (i % size, i / size);
            let value = if (x / cell + y / cell) % 2 == 0 { 230 } else { 60 };
            [value, value, value, 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_faces_point_outward() {
        let data = cube(2.0);
        assert_eq!(data.vertices.len(), 24);
        assert_eq!(data.indices.len(), 36);

        for triangle in data.indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(data.vertices[triangle[i] as usize].position));
            let winding_normal = (b - a).cross(&(c - a));
            let stored = Vec3::from(data.vertices[triangle[0] as usize].normal);
            assert!(winding_normal.dot(&stored) > 0.0);
        }
    }

    #[test]
    fn test_checker_is_rgba8() {
        let pixels = checker_pixels(16);
        assert_eq!(pixels.len(), 16 * 16 * 4);
        assert_eq!(&pixels[0..4], &[230, 230, 230, 255]);
    }

    #[test]
    fn test_placed_node_faces_target() {
        let world = placed_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros());
        let forward = -world.fixed_view::<3, 1>(0, 2).into_owned();
        assert!((forward - Vec3::new(0.0, 0.0, -1.0)).norm() < 1e-5);
    }
}
