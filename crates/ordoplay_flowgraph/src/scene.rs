// SPDX-License-Identifier: MIT OR Apache-2.0
//! Host scene collaborator.
//!
//! The flow-graph core only needs three things from a scene:
//! - parent links between meshes, to walk ancestors when bubbling picks
//! - whether the scene is ready
//! - a notification channel for pointer picks, readiness and disposal
//!
//! [`SceneHierarchy`] is the read-only query side. [`Scene`] is a minimal host
//! model implementing it, with explicit [`Subscription`] handles instead of
//! callbacks: observers own a receiver and unsubscribe explicitly.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::mpsc;
use uuid::Uuid;

/// Unique identifier for a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneId(pub Uuid);

impl SceneId {
    /// Create a new random scene ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SceneId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a mesh in a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MeshId(pub Uuid);

impl MeshId {
    /// Create a new random mesh ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MeshId {
    fn default() -> Self {
        Self::new()
    }
}

/// A node of the scene hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mesh {
    /// Mesh ID
    pub id: MeshId,
    /// Display name
    pub name: String,
    /// Parent mesh, `None` for roots
    pub parent: Option<MeshId>,
}

/// Hit-test result carried by a pointer pick notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickInfo {
    /// Whether anything was hit
    pub hit: bool,
    /// The mesh that was hit
    pub picked_mesh: Option<MeshId>,
    /// Pointer that produced the pick
    pub pointer_id: i64,
}

impl PickInfo {
    /// A pick that hit `mesh`
    pub fn hit(mesh: MeshId) -> Self {
        Self {
            hit: true,
            picked_mesh: Some(mesh),
            pointer_id: 0,
        }
    }

    /// A pick that hit nothing
    pub fn miss() -> Self {
        Self {
            hit: false,
            picked_mesh: None,
            pointer_id: 0,
        }
    }

    /// Set the pointer ID
    pub fn with_pointer_id(mut self, pointer_id: i64) -> Self {
        self.pointer_id = pointer_id;
        self
    }

    /// The picked mesh, if the pick actually hit something
    pub fn hit_mesh(&self) -> Option<MeshId> {
        self.picked_mesh.filter(|_| self.hit)
    }
}

/// Notification emitted by a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneEvent {
    /// Pointer pick
    PointerPick(PickInfo),
    /// Scene became ready (emitted once)
    Ready,
    /// Scene is being disposed
    Disposed,
}

/// Read-only hierarchy queries used for bubbling
pub trait SceneHierarchy {
    /// Parent of `mesh`, `None` for roots and unknown meshes
    fn parent_of(&self, mesh: MeshId) -> Option<MeshId>;

    /// Whether the scene already reported ready
    fn is_ready(&self) -> bool;
}

/// Identifier of a scene subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Handle returned by [`Scene::subscribe`]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    scene: SceneId,
    receiver: mpsc::Receiver<SceneEvent>,
}

impl Subscription {
    /// Subscription ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Scene this subscription listens to
    pub fn scene_id(&self) -> SceneId {
        self.scene
    }

    /// Next pending notification, if any
    pub fn try_next(&self) -> Option<SceneEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Errors raised by scene mutations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// Mesh not found
    #[error("Mesh not found: {0:?}")]
    MeshNotFound(MeshId),

    /// Re-parenting would create a cycle
    #[error("Parenting {0:?} would create a cycle")]
    ParentCycle(MeshId),

    /// Scene was disposed
    #[error("Scene is disposed")]
    Disposed,
}

/// Minimal host scene: meshes with parent links and a notification channel
#[derive(Debug)]
pub struct Scene {
    id: SceneId,
    meshes: IndexMap<MeshId, Mesh>,
    ready: bool,
    disposed: bool,
    observers: IndexMap<SubscriptionId, mpsc::Sender<SceneEvent>>,
    next_subscription: u64,
}

impl Scene {
    /// Create a new empty scene
    pub fn new() -> Self {
        Self {
            id: SceneId::new(),
            meshes: IndexMap::new(),
            ready: false,
            disposed: false,
            observers: IndexMap::new(),
            next_subscription: 1,
        }
    }

    /// Scene ID
    pub fn id(&self) -> SceneId {
        self.id
    }

    /// Add a mesh, optionally under `parent`
    pub fn add_mesh(
        &mut self,
        name: impl Into<String>,
        parent: Option<MeshId>,
    ) -> Result<MeshId, SceneError> {
        if self.disposed {
            return Err(SceneError::Disposed);
        }
        if let Some(parent) = parent {
            if !self.meshes.contains_key(&parent) {
                return Err(SceneError::MeshNotFound(parent));
            }
        }

        let id = MeshId::new();
        self.meshes.insert(
            id,
            Mesh {
                id,
                name: name.into(),
                parent,
            },
        );
        Ok(id)
    }

    /// Re-parent a mesh
    pub fn set_parent(&mut self, mesh: MeshId, parent: Option<MeshId>) -> Result<(), SceneError> {
        if !self.meshes.contains_key(&mesh) {
            return Err(SceneError::MeshNotFound(mesh));
        }
        if let Some(parent) = parent {
            if !self.meshes.contains_key(&parent) {
                return Err(SceneError::MeshNotFound(parent));
            }
            // Walking up from the new parent must not reach `mesh`
            let mut current = Some(parent);
            while let Some(id) = current {
                if id == mesh {
                    return Err(SceneError::ParentCycle(mesh));
                }
                current = self.parent_of(id);
            }
        }

        if let Some(entry) = self.meshes.get_mut(&mesh) {
            entry.parent = parent;
        }
        Ok(())
    }

    /// Get a mesh by ID
    pub fn mesh(&self, mesh: MeshId) -> Option<&Mesh> {
        self.meshes.get(&mesh)
    }

    /// Find a mesh by name
    pub fn mesh_by_name(&self, name: &str) -> Option<&Mesh> {
        self.meshes.values().find(|m| m.name == name)
    }

    /// Get all meshes
    pub fn meshes(&self) -> impl Iterator<Item = &Mesh> {
        self.meshes.values()
    }

    /// Subscribe to notifications
    pub fn subscribe(&mut self) -> Subscription {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;

        let (sender, receiver) = mpsc::channel();
        self.observers.insert(id, sender);
        tracing::debug!(subscription = id.0, "Scene subscription added");

        Subscription {
            id,
            scene: self.id,
            receiver,
        }
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, subscription: &Subscription) -> bool {
        let removed = self.observers.shift_remove(&subscription.id).is_some();
        if removed {
            tracing::debug!(subscription = subscription.id.0, "Scene subscription removed");
        }
        removed
    }

    /// Number of live subscriptions
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Mark the scene ready. Only the first call notifies observers.
    pub fn mark_ready(&mut self) {
        if self.ready || self.disposed {
            return;
        }
        self.ready = true;
        self.emit(SceneEvent::Ready);
    }

    /// Emit a pointer pick that hit `mesh`
    pub fn pick(&mut self, mesh: MeshId) -> Result<(), SceneError> {
        if !self.meshes.contains_key(&mesh) {
            return Err(SceneError::MeshNotFound(mesh));
        }
        self.emit_pick(PickInfo::hit(mesh));
        Ok(())
    }

    /// Emit an arbitrary pick notification
    pub fn emit_pick(&mut self, pick: PickInfo) {
        self.emit(SceneEvent::PointerPick(pick));
    }

    /// Dispose the scene: observers get a final `Disposed` notification
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.emit(SceneEvent::Disposed);
        self.disposed = true;
        self.observers.clear();
    }

    /// Whether the scene was disposed
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn emit(&mut self, event: SceneEvent) {
        if self.disposed {
            return;
        }
        // Receivers that were dropped without unsubscribing are pruned here
        self.observers
            .retain(|_, sender| sender.send(event).is_ok());
    }
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneHierarchy for Scene {
    fn parent_of(&self, mesh: MeshId) -> Option<MeshId> {
        self.meshes.get(&mesh).and_then(|m| m.parent)
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_links() {
        let mut scene = Scene::new();
        let root = scene.add_mesh("root", None).unwrap();
        let child = scene.add_mesh("child", Some(root)).unwrap();
        assert_eq!(scene.parent_of(child), Some(root));
        assert_eq!(scene.parent_of(root), None);
        assert_eq!(scene.mesh_by_name("child").unwrap().id, child);
    }

    #[test]
    fn test_set_parent_rejects_cycles() {
        let mut scene = Scene::new();
        let a = scene.add_mesh("a", None).unwrap();
        let b = scene.add_mesh("b", Some(a)).unwrap();
        assert_eq!(scene.set_parent(a, Some(b)), Err(SceneError::ParentCycle(a)));
        assert_eq!(scene.set_parent(a, Some(a)), Err(SceneError::ParentCycle(a)));
    }

    #[test]
    fn test_ready_is_emitted_once() {
        let mut scene = Scene::new();
        let sub = scene.subscribe();
        scene.mark_ready();
        scene.mark_ready();
        assert_eq!(sub.try_next(), Some(SceneEvent::Ready));
        assert_eq!(sub.try_next(), None);
        assert!(scene.is_ready());
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh("m", None).unwrap();
        let sub = scene.subscribe();
        assert!(scene.unsubscribe(&sub));
        assert!(!scene.unsubscribe(&sub));
        scene.pick(mesh).unwrap();
        assert_eq!(sub.try_next(), None);
    }

    #[test]
    fn test_dispose_notifies_and_clears() {
        let mut scene = Scene::new();
        let sub = scene.subscribe();
        scene.dispose();
        scene.dispose();
        assert_eq!(sub.try_next(), Some(SceneEvent::Disposed));
        assert_eq!(sub.try_next(), None);
        assert_eq!(scene.observer_count(), 0);
    }
}
