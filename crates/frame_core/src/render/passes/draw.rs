//! Geometry recording shared by the geometry passes
//!
//! Instances whose node was removed after the snapshot was built are skipped
//! for the frame.

use crate::foundation::math::Mat4;
use crate::render::recorder::CommandRecorder;
use crate::render::uniforms::{gpu_mat, GpuMat4, RegionLayout};
use crate::scene::{SceneGraph, SceneSnapshot};
use ash::vk;

/// Push constants of the depth-only passes
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct DepthPushConstants {
    /// Light or camera view-projection
    pub view_projection: GpuMat4,
    /// Instance world transform
    pub model: GpuMat4,
}

unsafe impl bytemuck::Pod for DepthPushConstants {}
unsafe impl bytemuck::Zeroable for DepthPushConstants {}

/// Record every surface of every live instance with depth-only state
///
/// With `per_surface_cull` each surface sets its material's cull mode;
/// otherwise the pipeline's static cull mode applies. Returns the number of
/// draws recorded.
pub fn record_depth_draws(
    recorder: &mut dyn CommandRecorder,
    graph: &SceneGraph,
    snapshot: &SceneSnapshot,
    layout: vk::PipelineLayout,
    view_projection: &Mat4,
    per_surface_cull: bool,
) -> usize {
    let mut draws = 0;

    for instance in snapshot.instances() {
        let Some(node) = graph.get(instance.node) else {
            continue;
        };
        let Some(buffers) = instance.mesh.buffers.as_ref() else {
            continue;
        };

        let constants = DepthPushConstants {
            view_projection: gpu_mat(view_projection),
            model: gpu_mat(&node.world_transform),
        };
        recorder.push_constants(layout, vk::ShaderStageFlags::VERTEX, 0, bytemuck::bytes_of(&constants));
        recorder.bind_vertex_buffer(buffers.vertex_buffer());
        recorder.bind_index_buffer(buffers.index_buffer());

        for surface in &instance.mesh.surfaces {
            if per_surface_cull {
                recorder.set_cull_mode(surface.material.cull_mode.to_vk());
            }
            recorder.draw_indexed(surface.index_count, surface.first_index);
            draws += 1;
        }
    }

    draws
}

/// Record every surface of every live instance with its material
///
/// Each surface binds set 0 with two dynamic offsets: the instance's model
/// record, then the surface's record. Returns the number of draws recorded.
pub fn record_surface_draws(
    recorder: &mut dyn CommandRecorder,
    graph: &SceneGraph,
    snapshot: &SceneSnapshot,
    layout: vk::PipelineLayout,
    set: vk::DescriptorSet,
    models: &RegionLayout,
    surfaces: &RegionLayout,
) -> usize {
    let mut draws = 0;

    for instance in snapshot.instances() {
        if graph.get(instance.node).is_none() {
            continue;
        }
        let Some(buffers) = instance.mesh.buffers.as_ref() else {
            continue;
        };

        recorder.bind_vertex_buffer(buffers.vertex_buffer());
        recorder.bind_index_buffer(buffers.index_buffer());

        for (surface, entry) in instance.mesh.surfaces.iter().zip(&instance.surfaces) {
            recorder.set_cull_mode(surface.material.cull_mode.to_vk());
            let offsets = [
                models.dynamic_offset(instance.model_slot),
                surfaces.dynamic_offset(entry.surface_slot),
            ];
            recorder.bind_descriptor_set(layout, 0, set, &offsets);
            recorder.draw_indexed(surface.index_count, surface.first_index);
            draws += 1;
        }
    }

    draws
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use crate::render::uniforms::{ModelUniform, SurfaceUniform};
    use crate::scene::{CullMode, Material, MeshInstance, NodeRole};
    use crate::testing::{built_mesh, CommandLog, RecordedCommand};
    use ash::vk::Handle;

    fn two_surface_scene() -> (SceneGraph, SceneSnapshot) {
        let front = Material::new(Vec4::new(1.0, 0.0, 0.0, 1.0));
        let both = Material::new(Vec4::new(0.0, 1.0, 0.0, 1.0)).with_cull_mode(CullMode::None);
        let mesh = built_mesh(vec![front, both]);

        let mut graph = SceneGraph::new();
        let root = graph.root();
        graph
            .add_child(root, "quad", NodeRole::MeshInstance(MeshInstance::new(mesh)), Mat4::identity())
            .unwrap();
        let snapshot = SceneSnapshot::build(&graph, root).unwrap();
        (graph, snapshot)
    }

    #[test]
    fn test_each_surface_draws_its_own_range() {
        let (graph, snapshot) = two_surface_scene();
        let models = RegionLayout::of::<ModelUniform>(snapshot.model_region_len(), 256);
        let surfaces = RegionLayout::of::<SurfaceUniform>(snapshot.surface_region_len(), 256);
        let set = vk::DescriptorSet::from_raw(7);

        let mut log = CommandLog::default();
        let draws = record_surface_draws(
            &mut log,
            &graph,
            &snapshot,
            vk::PipelineLayout::null(),
            set,
            &models,
            &surfaces,
        );

        assert_eq!(draws, 2);
        assert_eq!(log.indexed_draws(), vec![(3, 0), (3, 3)]);

        let culls: Vec<vk::CullModeFlags> = log
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::SetCullMode(mode) => Some(*mode),
                _ => None,
            })
            .collect();
        assert_eq!(culls, vec![vk::CullModeFlags::BACK, vk::CullModeFlags::NONE]);

        let offsets: Vec<Vec<u32>> = log
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BindDescriptorSet { dynamic_offsets, .. } => Some(dynamic_offsets.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(offsets, vec![vec![0, 0], vec![0, 256]]);
    }

    #[test]
    fn test_removed_instances_are_not_drawn() {
        let (mut graph, snapshot) = two_surface_scene();
        let node = snapshot.instances()[0].node;
        graph.remove(node).unwrap();

        let models = RegionLayout::of::<ModelUniform>(1, 256);
        let surfaces = RegionLayout::of::<SurfaceUniform>(2, 256);
        let mut log = CommandLog::default();
        let draws = record_surface_draws(
            &mut log,
            &graph,
            &snapshot,
            vk::PipelineLayout::null(),
            vk::DescriptorSet::null(),
            &models,
            &surfaces,
        );
        assert_eq!(draws, 0);
        assert!(log.commands.is_empty());

        let mut log = CommandLog::default();
        assert_eq!(
            record_depth_draws(&mut log, &graph, &snapshot, vk::PipelineLayout::null(), &Mat4::identity(), true),
            0
        );
    }

    #[test]
    fn test_depth_draws_push_transforms_once_per_instance() {
        let (graph, snapshot) = two_surface_scene();
        let mut log = CommandLog::default();
        let draws = record_depth_draws(
            &mut log,
            &graph,
            &snapshot,
            vk::PipelineLayout::null(),
            &Mat4::identity(),
            false,
        );

        assert_eq!(draws, 2);
        assert_eq!(std::mem::size_of::<DepthPushConstants>(), 128);
        assert!(matches!(log.commands[0], RecordedCommand::PushConstants { size: 128 }));
        assert!(!log.commands.iter().any(|c| matches!(c, RecordedCommand::SetCullMode(_))));
    }
}
