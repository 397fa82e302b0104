//! Scene graph storage
//!
//! Nodes carry a precomputed world transform; hierarchy math belongs to the
//! host. The graph only provides ownership, parent/child links and a stable
//! depth-first order.

use super::{Camera, DirectionalLight, Environment, Mesh, PointLight, SpotLight};
use crate::foundation::math::Mat4;
use crate::render::{RenderError, RenderResult};
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Key of a node in a [`SceneGraph`]
    pub struct NodeKey;
}

/// Mesh instance role
#[derive(Debug, Clone)]
pub struct MeshInstance {
    /// Shared mesh
    pub mesh: Arc<Mesh>,
}

impl MeshInstance {
    /// Instance a shared mesh
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self { mesh }
    }
}

/// What a node contributes to rendering
#[derive(Debug, Clone)]
pub enum NodeRole {
    /// Pure grouping node
    Group,
    /// Camera
    Camera(Camera),
    /// Directional light
    DirectionalLight(DirectionalLight),
    /// Point light
    PointLight(PointLight),
    /// Spot light
    SpotLight(SpotLight),
    /// Ambient environment
    Environment(Environment),
    /// Drawable mesh instance
    MeshInstance(MeshInstance),
}

impl NodeRole {
    /// Short role name for logs
    pub fn kind_name(&self) -> &'static str {
        match self {
            NodeRole::Group => "group",
            NodeRole::Camera(_) => "camera",
            NodeRole::DirectionalLight(_) => "directional light",
            NodeRole::PointLight(_) => "point light",
            NodeRole::SpotLight(_) => "spot light",
            NodeRole::Environment(_) => "environment",
            NodeRole::MeshInstance(_) => "mesh instance",
        }
    }
}

/// Scene graph node
#[derive(Debug, Clone)]
pub struct Node {
    /// Display name
    pub name: String,
    /// World transform, maintained by the host
    pub world_transform: Mat4,
    /// Role
    pub role: NodeRole,
    parent: Option<NodeKey>,
    children: Vec<NodeKey>,
}

impl Node {
    /// Parent node, `None` for the root
    pub fn parent(&self) -> Option<NodeKey> {
        self.parent
    }

    /// Children in insertion order
    pub fn children(&self) -> &[NodeKey] {
        &self.children
    }
}

/// Scene graph with a single root group
pub struct SceneGraph {
    nodes: SlotMap<NodeKey, Node>,
    root: NodeKey,
}

impl SceneGraph {
    /// Create a graph containing only the root group
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            name: "root".to_string(),
            world_transform: Mat4::identity(),
            role: NodeRole::Group,
            parent: None,
            children: Vec::new(),
        });
        Self { nodes, root }
    }

    /// Root node key
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of live nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root exists
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Add a child under `parent`
    pub fn add_child(
        &mut self,
        parent: NodeKey,
        name: impl Into<String>,
        role: NodeRole,
        world_transform: Mat4,
    ) -> RenderResult<NodeKey> {
        if !self.nodes.contains_key(parent) {
            return Err(RenderError::UnknownNode);
        }

        let key = self.nodes.insert(Node {
            name: name.into(),
            world_transform,
            role,
            parent: Some(parent),
            children: Vec::new(),
        });
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(key);
        }
        Ok(key)
    }

    /// Remove a node and its whole subtree
    ///
    /// The root cannot be removed. Returns the number of nodes removed.
    pub fn remove(&mut self, key: NodeKey) -> RenderResult<usize> {
        if key == self.root {
            return Err(RenderError::InvalidOperation("the scene root cannot be removed".to_string()));
        }
        let parent = self.nodes.get(key).ok_or(RenderError::UnknownNode)?.parent;

        if let Some(parent_node) = parent.and_then(|p| self.nodes.get_mut(p)) {
            parent_node.children.retain(|child| *child != key);
        }

        let subtree = self.depth_first(key);
        for node in &subtree {
            self.nodes.remove(*node);
        }
        Ok(subtree.len())
    }

    /// Node by key; `None` if removed
    pub fn get(&self, key: NodeKey) -> Option<&Node> {
        self.nodes.get(key)
    }

    /// Mutable node by key
    pub fn get_mut(&mut self, key: NodeKey) -> Option<&mut Node> {
        self.nodes.get_mut(key)
    }

    /// Replace a node's world transform
    pub fn set_world_transform(&mut self, key: NodeKey, world_transform: Mat4) -> RenderResult<()> {
        let node = self.nodes.get_mut(key).ok_or(RenderError::UnknownNode)?;
        node.world_transform = world_transform;
        Ok(())
    }

    /// Depth-first pre-order traversal starting at `start`
    ///
    /// Children are visited in insertion order. Returns an empty list for an
    /// unknown start key.
    pub fn depth_first(&self, start: NodeKey) -> Vec<NodeKey> {
        let mut order = Vec::new();
        let mut stack = vec![start];

        while let Some(key) = stack.pop() {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            order.push(key);
            stack.extend(node.children.iter().rev().copied());
        }

        order
    }
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_first_is_preorder_in_insertion_order() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = graph.add_child(root, "a", NodeRole::Group, Mat4::identity()).unwrap();
        let a1 = graph.add_child(a, "a1", NodeRole::Group, Mat4::identity()).unwrap();
        let b = graph.add_child(root, "b", NodeRole::Group, Mat4::identity()).unwrap();
        let a2 = graph.add_child(a, "a2", NodeRole::Group, Mat4::identity()).unwrap();

        assert_eq!(graph.depth_first(root), vec![root, a, a1, a2, b]);
    }

    #[test]
    fn test_remove_drops_subtree_and_invalidates_keys() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = graph.add_child(root, "a", NodeRole::Group, Mat4::identity()).unwrap();
        let a1 = graph.add_child(a, "a1", NodeRole::Group, Mat4::identity()).unwrap();

        assert_eq!(graph.remove(a).unwrap(), 2);
        assert!(graph.get(a1).is_none());
        assert!(graph.get(root).unwrap().children().is_empty());
        assert!(graph.is_empty());
    }

    #[test]
    fn test_root_cannot_be_removed() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        assert!(graph.remove(root).is_err());
    }

    #[test]
    fn test_add_to_removed_parent_fails() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let a = graph.add_child(root, "a", NodeRole::Group, Mat4::identity()).unwrap();
        graph.remove(a).unwrap();
        let result = graph.add_child(a, "orphan", NodeRole::Group, Mat4::identity());
        assert!(matches!(result, Err(RenderError::UnknownNode)));
    }
}
