// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scene coordinator: binds one scene's notifications to its flow graphs.
//!
//! A [`Coordinator`] subscribes once to a scene and fans each notification out
//! to every live graph created through it:
//! - pointer picks bubble from the picked mesh up through its ancestors
//! - the ready notification fires scene-ready blocks once per graph
//! - custom events sent by blocks are queued and delivered FIFO to every
//!   matching receiver before the triggering call returns
//!
//! Custom events travel on an event bus. A standalone coordinator owns its
//! bus; coordinators created through a [`CoordinatorRegistry`] share one, so
//! a sender in one scene reaches receivers in every other scene.
//!
//! Each graph's firing is isolated: a failing branch is logged and recorded in
//! the [`DispatchReport`], and dispatch carries on with the rest.

use crate::config::{BubblePolicy, FlowGraphConfig};
use crate::custom_event::{CustomEvent, CustomEventError, EventSchema, SchemaRegistry};
use crate::dispatch::DispatchReport;
use crate::execution::ExecutionError;
use crate::graph::{FlowGraph, GraphDescriptor, GraphError, GraphId};
use crate::port::PortValue;
use crate::scene::{MeshId, PickInfo, Scene, SceneEvent, SceneHierarchy, SceneId, Subscription};
use crate::sink::{DiagnosticSink, TracingSink};
use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::rc::{Rc, Weak};

/// Custom event queue, declarations and receivers
pub(crate) struct EventBus {
    pub outbox: RefCell<VecDeque<CustomEvent>>,
    pub schemas: RefCell<SchemaRegistry>,
    receivers: RefCell<Vec<(GraphId, Weak<RefCell<FlowGraph>>)>>,
    max_deliveries: usize,
}

impl EventBus {
    pub fn new(max_deliveries: usize) -> Self {
        Self {
            outbox: RefCell::new(VecDeque::new()),
            schemas: RefCell::new(SchemaRegistry::default()),
            receivers: RefCell::new(Vec::new()),
            max_deliveries,
        }
    }

    fn register(&self, id: GraphId, graph: &Rc<RefCell<FlowGraph>>) {
        self.receivers.borrow_mut().push((id, Rc::downgrade(graph)));
    }

    /// Prune dropped or disposed graphs, returning the rest in creation order
    fn live_receivers(&self) -> Vec<(GraphId, Rc<RefCell<FlowGraph>>)> {
        let mut receivers = self.receivers.borrow_mut();
        receivers.retain(|(_, weak)| {
            weak.upgrade()
                .is_some_and(|g| g.try_borrow().map_or(true, |g| !g.is_disposed()))
        });
        receivers
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|graph| (*id, graph)))
            .collect()
    }

    /// Drain the outbox FIFO into every live receiver.
    ///
    /// `current` is a graph the caller already holds mutably; it is delivered
    /// to directly instead of through its cell.
    pub fn deliver(&self, mut current: Option<&mut FlowGraph>, report: &mut DispatchReport) {
        let mut delivered = 0;

        loop {
            let Some(event) = self.outbox.borrow_mut().pop_front() else {
                break;
            };
            if delivered >= self.max_deliveries {
                let dropped = {
                    let mut outbox = self.outbox.borrow_mut();
                    let dropped = outbox.len() + 1;
                    outbox.clear();
                    dropped
                };
                tracing::warn!(
                    limit = self.max_deliveries,
                    dropped,
                    "Custom event delivery limit reached, dropping events"
                );
                break;
            }
            delivered += 1;

            tracing::trace!(event_id = %event.event_id, "Delivering custom event");
            for (id, graph) in self.live_receivers() {
                if let Some(held) = current.as_deref_mut().filter(|g| g.id() == id) {
                    held.deliver_custom_event(&event, report);
                    continue;
                }
                match graph.try_borrow_mut() {
                    Ok(mut graph) => graph.deliver_custom_event(&event, report),
                    Err(_) => busy(id, report),
                }
            }
        }

        report.custom_events_delivered += delivered;
    }

    /// Check that every live send/receive pair agrees on its fields
    fn validate(&self) -> Result<(), CustomEventError> {
        let mut declarations: IndexMap<String, Vec<EventSchema>> = IndexMap::new();
        for (_, graph) in self.live_receivers() {
            let Ok(graph) = graph.try_borrow() else {
                continue;
            };
            for block in graph.blocks() {
                let Some((event_id, schema)) = block.kind.custom_event() else {
                    continue;
                };
                let declared = declarations.entry(event_id.to_string()).or_default();
                if let Some(field) = declared.iter().find_map(|d| d.first_conflict(schema)) {
                    return Err(CustomEventError::SchemaConflict {
                        event_id: event_id.to_string(),
                        field,
                    });
                }
                declared.push(schema.clone());
            }
        }
        Ok(())
    }
}

/// State shared between a coordinator and its graphs
pub(crate) struct CoordinatorShared {
    pub config: FlowGraphConfig,
    pub sink: Rc<dyn DiagnosticSink>,
    pub scene_ready: Cell<bool>,
    pub bus: Rc<EventBus>,
    next_notification: Cell<u64>,
}

impl CoordinatorShared {
    pub fn new(
        config: FlowGraphConfig,
        sink: Rc<dyn DiagnosticSink>,
        scene_ready: bool,
        bus: Rc<EventBus>,
    ) -> Self {
        Self {
            config,
            sink,
            scene_ready: Cell::new(scene_ready),
            bus,
            next_notification: Cell::new(1),
        }
    }

    fn next_notification(&self) -> u64 {
        let id = self.next_notification.get();
        self.next_notification.set(id + 1);
        id
    }
}

/// Registry binding one scene to its flow graphs
pub struct Coordinator {
    scene_id: SceneId,
    subscription: Option<Subscription>,
    shared: Rc<CoordinatorShared>,
    graphs: Vec<(GraphId, Weak<RefCell<FlowGraph>>)>,
    disposed: bool,
}

impl Coordinator {
    /// Create a coordinator for `scene`, logging through `tracing`
    pub fn new(scene: &mut Scene, config: FlowGraphConfig) -> Self {
        Self::with_sink(scene, config, Rc::new(TracingSink))
    }

    /// Create a coordinator for `scene` with a custom diagnostic sink
    pub fn with_sink(
        scene: &mut Scene,
        config: FlowGraphConfig,
        sink: Rc<dyn DiagnosticSink>,
    ) -> Self {
        let bus = Rc::new(EventBus::new(config.max_custom_event_deliveries));
        Self::with_bus(scene, config, sink, bus)
    }

    /// Create a coordinator whose custom events travel on `bus`
    pub(crate) fn with_bus(
        scene: &mut Scene,
        config: FlowGraphConfig,
        sink: Rc<dyn DiagnosticSink>,
        bus: Rc<EventBus>,
    ) -> Self {
        let subscription = scene.subscribe();
        tracing::debug!(scene = ?scene.id(), "Created flow graph coordinator");
        Self {
            scene_id: scene.id(),
            subscription: Some(subscription),
            shared: Rc::new(CoordinatorShared::new(config, sink, scene.is_ready(), bus)),
            graphs: Vec::new(),
            disposed: false,
        }
    }

    /// Scene this coordinator is bound to
    pub fn scene_id(&self) -> SceneId {
        self.scene_id
    }

    /// Runtime configuration
    pub fn config(&self) -> &FlowGraphConfig {
        &self.shared.config
    }

    /// Whether the coordinator was torn down
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Whether the scene reported ready
    pub fn is_scene_ready(&self) -> bool {
        self.shared.scene_ready.get()
    }

    /// Create a new graph bound to this coordinator's scene.
    ///
    /// The caller owns the graph; the coordinator only keeps a weak reference,
    /// so dropping the returned handle removes the graph from dispatch.
    pub fn create_graph(&mut self, name: impl Into<String>) -> Result<Rc<RefCell<FlowGraph>>, GraphError> {
        if self.disposed {
            return Err(GraphError::Disposed);
        }
        let graph = FlowGraph::new(name, Rc::clone(&self.shared));
        let id = graph.id();
        let graph = Rc::new(RefCell::new(graph));
        self.graphs.push((id, Rc::downgrade(&graph)));
        self.shared.bus.register(id, &graph);
        tracing::debug!(scene = ?self.scene_id, graph = ?id, "Created flow graph");
        Ok(graph)
    }

    /// Create a graph and load a descriptor into it
    pub fn create_graph_from(
        &mut self,
        descriptor: GraphDescriptor,
    ) -> Result<Rc<RefCell<FlowGraph>>, GraphError> {
        let graph = self.create_graph(descriptor.name.clone())?;
        graph.borrow_mut().load_descriptor(descriptor)?;
        Ok(graph)
    }

    /// Graphs still alive and not disposed
    pub fn graphs(&mut self) -> Vec<Rc<RefCell<FlowGraph>>> {
        self.live_graphs().into_iter().map(|(_, graph)| graph).collect()
    }

    /// Prune dropped or disposed graphs, returning the rest in creation order
    fn live_graphs(&mut self) -> Vec<(GraphId, Rc<RefCell<FlowGraph>>)> {
        self.graphs.retain(|(_, weak)| {
            weak.upgrade()
                .is_some_and(|g| g.try_borrow().map_or(true, |g| !g.is_disposed()))
        });
        self.graphs
            .iter()
            .filter_map(|(id, weak)| weak.upgrade().map(|graph| (*id, graph)))
            .collect()
    }

    /// Number of blocks declaring a custom event
    pub fn custom_event_users(&self, event_id: &str) -> usize {
        self.shared.bus.schemas.borrow().users(event_id)
    }

    /// Drain pending scene notifications and dispatch them in order
    pub fn pump(&mut self, scene: &dyn SceneHierarchy) -> DispatchReport {
        let mut report = DispatchReport::default();
        loop {
            let Some(event) = self.subscription.as_ref().and_then(Subscription::try_next) else {
                break;
            };
            match event {
                SceneEvent::PointerPick(pick) => report.merge(self.notify_pick(scene, &pick)),
                SceneEvent::Ready => report.merge(self.notify_ready()),
                SceneEvent::Disposed => {
                    tracing::debug!(scene = ?self.scene_id, "Scene disposed, tearing down coordinator");
                    self.teardown();
                    break;
                }
            }
        }
        report
    }

    /// Dispatch a pointer pick.
    ///
    /// Blocks bound to the picked mesh fire first, then blocks bound to its
    /// parent, walking up until the chain is exhausted or a block stops
    /// propagation.
    pub fn notify_pick(&mut self, scene: &dyn SceneHierarchy, pick: &PickInfo) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.disposed {
            return report;
        }
        let Some(picked) = pick.hit_mesh() else {
            tracing::trace!(scene = ?self.scene_id, "Pick missed, nothing to dispatch");
            return report;
        };

        let chain = ancestry(scene, picked);
        let notification = self.shared.next_notification();
        let graphs = self.live_graphs();

        for mesh in chain {
            let errors_before = report.errors.len();
            let mut stop = false;

            for (id, graph) in &graphs {
                match graph.try_borrow_mut() {
                    Ok(mut graph) => {
                        stop |= graph.dispatch_pick(notification, mesh, pick, &mut report);
                    }
                    Err(_) => busy(*id, &mut report),
                }
            }

            if stop {
                tracing::debug!(mesh = ?mesh, "Pick propagation stopped");
                break;
            }
            if self.shared.config.bubble_error_policy == BubblePolicy::HaltOnError
                && report.errors.len() > errors_before
            {
                tracing::warn!(mesh = ?mesh, "Pick propagation halted after error");
                break;
            }
        }

        self.deliver_custom_events(&mut report);
        report
    }

    /// Dispatch the scene-ready notification
    pub fn notify_ready(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.disposed {
            return report;
        }
        self.shared.scene_ready.set(true);

        for (id, graph) in self.live_graphs() {
            match graph.try_borrow_mut() {
                Ok(mut graph) => graph.fire_scene_ready(&mut report),
                Err(_) => busy(id, &mut report),
            }
        }

        self.deliver_custom_events(&mut report);
        report
    }

    /// Send a custom event from the host
    pub fn notify_custom_event(
        &mut self,
        event_id: impl Into<String>,
        payload: IndexMap<String, PortValue>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if self.disposed {
            return report;
        }
        self.shared.bus.outbox.borrow_mut().push_back(CustomEvent {
            event_id: event_id.into(),
            payload,
        });
        self.deliver_custom_events(&mut report);
        report
    }

    /// Deliver custom events queued outside a dispatch
    pub fn flush_custom_events(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.deliver_custom_events(&mut report);
        report
    }

    fn deliver_custom_events(&self, report: &mut DispatchReport) {
        self.shared.bus.deliver(None, report);
    }

    /// Check that every live send/receive pair on the bus agrees on its fields
    pub fn validate_custom_events(&self) -> Result<(), GraphError> {
        Ok(self.shared.bus.validate()?)
    }

    fn teardown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for graph in self.graphs() {
            match graph.try_borrow_mut() {
                Ok(mut graph) => graph.dispose(),
                Err(_) => tracing::warn!("Graph busy during teardown, leaving it to its owner"),
            }
        }
        self.graphs.clear();
        self.subscription = None;
    }

    /// Unsubscribe from the scene and dispose every graph. Safe to call twice.
    pub fn dispose(&mut self, scene: &mut Scene) {
        if let Some(subscription) = self.subscription.as_ref() {
            scene.unsubscribe(subscription);
        }
        if !self.disposed {
            tracing::debug!(scene = ?self.scene_id, "Disposing flow graph coordinator");
        }
        self.teardown();
    }
}

/// The graph is borrowed by its owner while a notification arrives
fn busy(graph: GraphId, report: &mut DispatchReport) {
    report.record_error(graph, None, ExecutionError::GraphBusy(graph));
}

/// `mesh` followed by its ancestors, nearest first
fn ancestry(scene: &dyn SceneHierarchy, mesh: MeshId) -> Vec<MeshId> {
    let mut chain = vec![mesh];
    let mut seen = HashSet::from([mesh]);
    let mut current = scene.parent_of(mesh);
    while let Some(parent) = current {
        if !seen.insert(parent) {
            tracing::warn!(mesh = ?parent, "Parent cycle in scene hierarchy, stopping bubbling");
            break;
        }
        chain.push(parent);
        current = scene.parent_of(parent);
    }
    chain
}

/// Explicit per-process map from scene to coordinator.
///
/// Every coordinator it creates shares one event bus, so custom events cross
/// scenes.
pub struct CoordinatorRegistry {
    config: FlowGraphConfig,
    sink: Rc<dyn DiagnosticSink>,
    bus: Rc<EventBus>,
    coordinators: IndexMap<SceneId, Coordinator>,
}

impl CoordinatorRegistry {
    /// Create an empty registry logging through `tracing`
    pub fn new(config: FlowGraphConfig) -> Self {
        Self::with_sink(config, Rc::new(TracingSink))
    }

    /// Create an empty registry with a custom diagnostic sink
    pub fn with_sink(config: FlowGraphConfig, sink: Rc<dyn DiagnosticSink>) -> Self {
        let bus = Rc::new(EventBus::new(config.max_custom_event_deliveries));
        Self {
            config,
            sink,
            bus,
            coordinators: IndexMap::new(),
        }
    }

    /// The coordinator for `scene`, created on first use
    pub fn coordinator_for(&mut self, scene: &mut Scene) -> &mut Coordinator {
        let config = &self.config;
        let sink = &self.sink;
        let bus = &self.bus;
        self.coordinators.entry(scene.id()).or_insert_with(|| {
            Coordinator::with_bus(scene, config.clone(), Rc::clone(sink), Rc::clone(bus))
        })
    }

    /// Send a custom event from the host to receivers in every scene
    pub fn notify_custom_event(
        &mut self,
        event_id: impl Into<String>,
        payload: IndexMap<String, PortValue>,
    ) -> DispatchReport {
        self.bus.outbox.borrow_mut().push_back(CustomEvent {
            event_id: event_id.into(),
            payload,
        });
        self.flush_custom_events()
    }

    /// Deliver custom events queued outside a dispatch
    pub fn flush_custom_events(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        self.bus.deliver(None, &mut report);
        report
    }

    /// Number of blocks in any scene declaring a custom event
    pub fn custom_event_users(&self, event_id: &str) -> usize {
        self.bus.schemas.borrow().users(event_id)
    }

    /// Get the coordinator for a scene
    pub fn get(&self, scene_id: SceneId) -> Option<&Coordinator> {
        self.coordinators.get(&scene_id)
    }

    /// Get the coordinator for a scene mutably
    pub fn get_mut(&mut self, scene_id: SceneId) -> Option<&mut Coordinator> {
        self.coordinators.get_mut(&scene_id)
    }

    /// Dispose and forget the coordinator for `scene`
    pub fn remove(&mut self, scene: &mut Scene) -> bool {
        match self.coordinators.shift_remove(&scene.id()) {
            Some(mut coordinator) => {
                coordinator.dispose(scene);
                true
            }
            None => false,
        }
    }

    /// Live graphs of a scene
    pub fn graphs_for(&mut self, scene_id: SceneId) -> Vec<Rc<RefCell<FlowGraph>>> {
        self.coordinators
            .get_mut(&scene_id)
            .map(Coordinator::graphs)
            .unwrap_or_default()
    }

    /// Number of registered scenes
    pub fn len(&self) -> usize {
        self.coordinators.len()
    }

    /// Whether no scene is registered
    pub fn is_empty(&self) -> bool {
        self.coordinators.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{ports, ArithmeticOp, Block, BlockId, NumericType};
    use crate::port::PortType;
    use crate::sink::MemorySink;

    fn setup(scene: &mut Scene) -> (Coordinator, MemorySink) {
        setup_with(scene, FlowGraphConfig::default())
    }

    fn setup_with(scene: &mut Scene, config: FlowGraphConfig) -> (Coordinator, MemorySink) {
        let sink = MemorySink::new();
        let coordinator = Coordinator::with_sink(scene, config, Rc::new(sink.clone()));
        (coordinator, sink)
    }

    /// Pick block bound to `mesh` that logs `message`
    fn logging_pick(graph: &mut FlowGraph, mesh: MeshId, message: &str) -> BlockId {
        let pick = graph.add_event_block(Block::mesh_pick_event(mesh)).unwrap();
        let log = graph
            .add_block(Block::console_log().with_input_default(ports::MESSAGE, message.into()))
            .unwrap();
        graph.connect(pick, ports::DONE, log, ports::IN).unwrap();
        pick
    }

    #[test]
    fn test_custom_event_logs_payload() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);
        let schema = EventSchema::new().with_field("testData", PortType::Float);

        let graph = coordinator.create_graph("custom").unwrap();
        {
            let mut g = graph.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            let send = g
                .add_block(
                    Block::send_custom_event("myEvent", schema.clone())
                        .with_input_default("testData", PortValue::Float(0.42)),
                )
                .unwrap();
            g.connect(ready, ports::DONE, send, ports::IN).unwrap();

            let receive = g
                .add_event_block(Block::receive_custom_event("myEvent", schema))
                .unwrap();
            let log = g.add_block(Block::console_log()).unwrap();
            g.connect(receive, ports::DONE, log, ports::IN).unwrap();
            g.connect(receive, "testData", log, ports::MESSAGE).unwrap();
            g.start().unwrap();
        }

        scene.mark_ready();
        let report = coordinator.pump(&scene);

        assert!(report.is_clean());
        assert_eq!(report.custom_events_delivered, 1);
        assert_eq!(sink.messages(), vec!["0.42"]);
    }

    #[test]
    fn test_custom_event_crosses_graphs() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);
        let schema = EventSchema::new().with_field("x", PortType::Int);

        let sender = coordinator.create_graph("sender").unwrap();
        let receivers: Vec<_> = (0..2)
            .map(|_| coordinator.create_graph("receiver").unwrap())
            .collect();

        {
            let mut g = sender.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            let send = g
                .add_block(
                    Block::send_custom_event("E", schema.clone())
                        .with_input_default("x", PortValue::Int(7)),
                )
                .unwrap();
            g.connect(ready, ports::DONE, send, ports::IN).unwrap();
            g.start().unwrap();
        }
        let mut receive_blocks = Vec::new();
        for graph in &receivers {
            let mut g = graph.borrow_mut();
            let receive = g
                .add_event_block(Block::receive_custom_event("E", schema.clone()))
                .unwrap();
            let log = g.add_block(Block::console_log()).unwrap();
            g.connect(receive, ports::DONE, log, ports::IN).unwrap();
            g.connect(receive, "x", log, ports::MESSAGE).unwrap();
            g.start().unwrap();
            receive_blocks.push(receive);
        }

        let report = coordinator.notify_ready();

        assert!(report.is_clean());
        assert_eq!(sink.messages(), vec!["7", "7"]);
        let fired: Vec<BlockId> = report.fired_blocks().collect();
        for receive in receive_blocks {
            assert!(fired.contains(&receive));
        }
    }

    #[test]
    fn test_custom_event_without_receiver_is_noop() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);
        let _graph = coordinator.create_graph("empty").unwrap();

        let report = coordinator.notify_custom_event("nobody", IndexMap::new());
        assert!(report.is_clean());
        assert_eq!(report.fired_count(), 0);
        assert_eq!(report.custom_events_delivered, 1);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_custom_event_missing_field_is_reported() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);
        let schema = EventSchema::new().with_field("testData", PortType::Float);

        let graph = coordinator.create_graph("receiver").unwrap();
        graph
            .borrow_mut()
            .add_event_block(Block::receive_custom_event("E", schema))
            .unwrap();
        graph.borrow_mut().start().unwrap();

        let payload = IndexMap::from([("other".to_string(), PortValue::Float(1.0))]);
        let report = coordinator.notify_custom_event("E", payload);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(
            report.errors[0].error,
            ExecutionError::MissingEventField {
                event_id: "E".to_string(),
                field: "testData".to_string(),
            }
        );
    }

    #[test]
    fn test_conflicting_declarations_rejected_at_wiring() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);

        let first = coordinator.create_graph("first").unwrap();
        let second = coordinator.create_graph("second").unwrap();
        first
            .borrow_mut()
            .add_block(Block::send_custom_event(
                "E",
                EventSchema::new().with_field("x", PortType::Float),
            ))
            .unwrap();

        let err = second
            .borrow_mut()
            .add_event_block(Block::receive_custom_event(
                "E",
                EventSchema::new().with_field("x", PortType::String),
            ))
            .unwrap_err();
        assert!(matches!(err, GraphError::CustomEvent(_)));
        assert_eq!(coordinator.custom_event_users("E"), 1);
        coordinator.validate_custom_events().unwrap();
    }

    #[test]
    fn test_pick_bubbles_to_bound_ancestors() {
        let mut scene = Scene::new();
        let mesh1 = scene.add_mesh("mesh1", None).unwrap();
        let mesh2 = scene.add_mesh("mesh2", Some(mesh1)).unwrap();
        let mesh3 = scene.add_mesh("mesh3", Some(mesh2)).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("bubbling").unwrap();
        let (pick1, pick3) = {
            let mut g = graph.borrow_mut();
            // Registered ancestor-first so ordering comes from the hierarchy
            let pick1 = logging_pick(&mut g, mesh1, "mesh1 done");
            let pick3 = logging_pick(&mut g, mesh3, "mesh3 done");
            g.start().unwrap();
            (pick1, pick3)
        };

        scene.pick(mesh3).unwrap();
        let report = coordinator.pump(&scene);

        assert!(report.is_clean());
        assert_eq!(sink.messages(), vec!["mesh3 done", "mesh1 done"]);
        assert_eq!(report.fired_blocks().collect::<Vec<_>>(), vec![pick3, pick1]);

        // Both handlers are recorded against the same notification
        let g = graph.borrow();
        let ctx = g.default_context().unwrap();
        assert_eq!(ctx.pick_handlers(), &[pick3, pick1]);
    }

    #[test]
    fn test_pick_on_unbound_mesh_fires_nothing() {
        let mut scene = Scene::new();
        let mesh1 = scene.add_mesh("mesh1", None).unwrap();
        let mesh2 = scene.add_mesh("mesh2", None).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        logging_pick(&mut graph.borrow_mut(), mesh1, "mesh1 done");
        graph.borrow_mut().start().unwrap();

        let report = coordinator.notify_pick(&scene, &PickInfo::hit(mesh2));
        assert_eq!(report.fired_count(), 0);
        let report = coordinator.notify_pick(&scene, &PickInfo::miss());
        assert_eq!(report.fired_count(), 0);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_stop_propagation_halts_bubbling() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh("parent", None).unwrap();
        let child = scene.add_mesh("child", Some(parent)).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        {
            let mut g = graph.borrow_mut();
            logging_pick(&mut g, parent, "parent");
            let pick = g
                .add_event_block(Block::mesh_pick_event(child).with_stop_propagation(true))
                .unwrap();
            let log = g
                .add_block(Block::console_log().with_input_default(ports::MESSAGE, "child".into()))
                .unwrap();
            g.connect(pick, ports::DONE, log, ports::IN).unwrap();
            g.start().unwrap();
        }

        coordinator.notify_pick(&scene, &PickInfo::hit(child));
        assert_eq!(sink.messages(), vec!["child"]);
    }

    /// Pick block on `mesh` whose log divides by zero
    fn failing_pick(graph: &mut FlowGraph, mesh: MeshId) {
        let pick = graph.add_event_block(Block::mesh_pick_event(mesh)).unwrap();
        let divide = graph
            .add_block(
                Block::arithmetic(ArithmeticOp::Divide, NumericType::Int)
                    .with_input_default(ports::A, PortValue::Int(1)),
            )
            .unwrap();
        let log = graph.add_block(Block::console_log()).unwrap();
        graph.connect(pick, ports::DONE, log, ports::IN).unwrap();
        graph.connect(divide, ports::VALUE, log, ports::MESSAGE).unwrap();
    }

    #[test]
    fn test_bubbling_continues_after_error_by_default() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh("parent", None).unwrap();
        let child = scene.add_mesh("child", Some(parent)).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        {
            let mut g = graph.borrow_mut();
            failing_pick(&mut g, child);
            logging_pick(&mut g, parent, "parent");
            g.start().unwrap();
        }

        let report = coordinator.notify_pick(&scene, &PickInfo::hit(child));
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(
            report.errors[0].error,
            ExecutionError::DivisionByZero(_)
        ));
        assert_eq!(sink.messages(), vec!["parent"]);
    }

    #[test]
    fn test_bubbling_halts_on_error_when_configured() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh("parent", None).unwrap();
        let child = scene.add_mesh("child", Some(parent)).unwrap();
        let config = FlowGraphConfig {
            bubble_error_policy: BubblePolicy::HaltOnError,
            ..Default::default()
        };
        let (mut coordinator, sink) = setup_with(&mut scene, config);

        let graph = coordinator.create_graph("g").unwrap();
        {
            let mut g = graph.borrow_mut();
            failing_pick(&mut g, child);
            logging_pick(&mut g, parent, "parent");
            g.start().unwrap();
        }

        let report = coordinator.notify_pick(&scene, &PickInfo::hit(child));
        assert_eq!(report.errors.len(), 1);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_failing_graph_does_not_block_others() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh("mesh", None).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let broken = coordinator.create_graph("broken").unwrap();
        failing_pick(&mut broken.borrow_mut(), mesh);
        broken.borrow_mut().start().unwrap();

        let healthy = coordinator.create_graph("healthy").unwrap();
        logging_pick(&mut healthy.borrow_mut(), mesh, "healthy");
        healthy.borrow_mut().start().unwrap();

        let report = coordinator.notify_pick(&scene, &PickInfo::hit(mesh));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].graph, broken.borrow().id());
        assert_eq!(sink.messages(), vec!["healthy"]);
    }

    #[test]
    fn test_pick_exposes_picked_mesh() {
        let mut scene = Scene::new();
        let parent = scene.add_mesh("parent", None).unwrap();
        let child = scene.add_mesh("child", Some(parent)).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        {
            let mut g = graph.borrow_mut();
            let pick = g.add_event_block(Block::mesh_pick_event(parent)).unwrap();
            let log = g.add_block(Block::console_log()).unwrap();
            g.connect(pick, ports::DONE, log, ports::IN).unwrap();
            g.connect(pick, ports::PICKED_MESH, log, ports::MESSAGE).unwrap();
            g.start().unwrap();
        }

        coordinator.notify_pick(&scene, &PickInfo::hit(child).with_pointer_id(3));
        assert_eq!(sink.entries(), vec![PortValue::Mesh(Some(child))]);
    }

    #[test]
    fn test_scene_ready_fires_once() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        {
            let mut g = graph.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            let log = g
                .add_block(Block::console_log().with_input_default(ports::MESSAGE, "ready".into()))
                .unwrap();
            g.connect(ready, ports::DONE, log, ports::IN).unwrap();
            g.start().unwrap();
        }

        scene.mark_ready();
        coordinator.pump(&scene);
        coordinator.notify_ready();
        graph.borrow_mut().stop();
        graph.borrow_mut().start().unwrap();
        assert_eq!(sink.messages(), vec!["ready"]);
    }

    #[test]
    fn test_scene_ready_fires_on_late_start() {
        let mut scene = Scene::new();
        scene.mark_ready();
        let (mut coordinator, sink) = setup(&mut scene);
        assert!(coordinator.is_scene_ready());

        let graph = coordinator.create_graph("late").unwrap();
        let mut g = graph.borrow_mut();
        let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
        let log = g
            .add_block(Block::console_log().with_input_default(ports::MESSAGE, "late".into()))
            .unwrap();
        g.connect(ready, ports::DONE, log, ports::IN).unwrap();

        let report = g.start().unwrap();
        assert_eq!(report.fired_count(), 1);
        g.start().unwrap();
        drop(g);

        coordinator.notify_ready();
        assert_eq!(sink.messages(), vec!["late"]);
    }

    #[test]
    fn test_data_output_computed_once_per_activation() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("memo").unwrap();
        let add = {
            let mut g = graph.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            let add = g
                .add_block(
                    Block::arithmetic(ArithmeticOp::Add, NumericType::Float)
                        .with_input_default(ports::A, PortValue::Float(1.0))
                        .with_input_default(ports::B, PortValue::Float(2.0)),
                )
                .unwrap();
            let seq = g.add_block(Block::sequence(2)).unwrap();
            let first = g.add_block(Block::console_log()).unwrap();
            let second = g.add_block(Block::console_log()).unwrap();

            g.connect(ready, ports::DONE, seq, ports::IN).unwrap();
            g.connect(seq, "out_0", first, ports::IN).unwrap();
            g.connect(seq, "out_1", second, ports::IN).unwrap();
            g.connect(add, ports::VALUE, first, ports::MESSAGE).unwrap();
            g.connect(add, ports::VALUE, second, ports::MESSAGE).unwrap();
            g.start().unwrap();
            add
        };

        coordinator.notify_ready();
        assert_eq!(sink.messages(), vec!["3", "3"]);
        let g = graph.borrow();
        assert_eq!(g.default_context().unwrap().compute_count(add), 1);
    }

    #[test]
    fn test_variables_flow_between_activations() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh("counter", None).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("counter").unwrap();
        {
            let mut g = graph.borrow_mut();
            let pick = g.add_event_block(Block::mesh_pick_event(mesh)).unwrap();
            let get = g
                .add_block(Block::get_variable("clicks", PortType::Int))
                .unwrap();
            let add = g
                .add_block(
                    Block::arithmetic(ArithmeticOp::Add, NumericType::Int)
                        .with_input_default(ports::B, PortValue::Int(1)),
                )
                .unwrap();
            let set = g.add_block(Block::set_variable("clicks")).unwrap();
            let log = g.add_block(Block::console_log()).unwrap();

            g.connect(get, ports::VALUE, add, ports::A).unwrap();
            g.connect(add, ports::VALUE, set, ports::VALUE).unwrap();
            g.connect(add, ports::VALUE, log, ports::MESSAGE).unwrap();
            g.connect(pick, ports::DONE, set, ports::IN).unwrap();
            g.connect(set, ports::OUT, log, ports::IN).unwrap();
            g.start().unwrap();
        }

        for _ in 0..3 {
            coordinator.notify_pick(&scene, &PickInfo::hit(mesh));
        }
        assert_eq!(sink.messages(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_branch_selects_output() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("branch").unwrap();
        {
            let mut g = graph.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            let branch = g
                .add_block(Block::branch().with_input_default(ports::CONDITION, PortValue::Bool(false)))
                .unwrap();
            let yes = g
                .add_block(Block::console_log().with_input_default(ports::MESSAGE, "yes".into()))
                .unwrap();
            let no = g
                .add_block(Block::console_log().with_input_default(ports::MESSAGE, "no".into()))
                .unwrap();
            g.connect(ready, ports::DONE, branch, ports::IN).unwrap();
            g.connect(branch, ports::ON_TRUE, yes, ports::IN).unwrap();
            g.connect(branch, ports::ON_FALSE, no, ports::IN).unwrap();
            g.start().unwrap();
        }

        coordinator.notify_ready();
        assert_eq!(sink.messages(), vec!["no"]);
    }

    #[test]
    fn test_fan_out_fires_in_connection_order() {
        let mut scene = Scene::new();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("fan-out").unwrap();
        {
            let mut g = graph.borrow_mut();
            let ready = g.add_event_block(Block::scene_ready_event()).unwrap();
            for label in ["a", "b", "c"] {
                let log = g
                    .add_block(Block::console_log().with_input_default(ports::MESSAGE, label.into()))
                    .unwrap();
                g.connect(ready, ports::DONE, log, ports::IN).unwrap();
            }
            g.start().unwrap();
        }

        coordinator.notify_ready();
        assert_eq!(sink.messages(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_custom_event_ping_pong_is_bounded() {
        let mut scene = Scene::new();
        let config = FlowGraphConfig {
            max_custom_event_deliveries: 5,
            ..Default::default()
        };
        let (mut coordinator, _sink) = setup_with(&mut scene, config);

        let graph = coordinator.create_graph("loop").unwrap();
        {
            let mut g = graph.borrow_mut();
            let receive = g
                .add_event_block(Block::receive_custom_event("tick", EventSchema::new()))
                .unwrap();
            let send = g
                .add_block(Block::send_custom_event("tick", EventSchema::new()))
                .unwrap();
            g.connect(receive, ports::DONE, send, ports::IN).unwrap();
            g.start().unwrap();
        }

        let report = coordinator.notify_custom_event("tick", IndexMap::new());
        assert_eq!(report.custom_events_delivered, 5);
        assert_eq!(report.fired_count(), 5);
    }

    #[test]
    fn test_dispose_unsubscribes_and_is_idempotent() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);
        let graph = coordinator.create_graph("g").unwrap();
        assert_eq!(scene.observer_count(), 1);

        coordinator.dispose(&mut scene);
        coordinator.dispose(&mut scene);
        assert_eq!(scene.observer_count(), 0);
        assert!(coordinator.is_disposed());
        assert!(graph.borrow().is_disposed());
        assert!(coordinator.create_graph("late").is_err());
    }

    #[test]
    fn test_scene_dispose_tears_down() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);
        let graph = coordinator.create_graph("g").unwrap();

        scene.dispose();
        coordinator.pump(&scene);
        assert!(coordinator.is_disposed());
        assert!(graph.borrow().is_disposed());
    }

    #[test]
    fn test_dropped_graph_leaves_dispatch() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);
        let graph = coordinator.create_graph("g").unwrap();
        assert_eq!(coordinator.graphs().len(), 1);
        drop(graph);
        assert!(coordinator.graphs().is_empty());
    }

    #[test]
    fn test_disposed_graph_stops_receiving() {
        let mut scene = Scene::new();
        let mesh = scene.add_mesh("mesh", None).unwrap();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("g").unwrap();
        logging_pick(&mut graph.borrow_mut(), mesh, "picked");
        graph.borrow_mut().start().unwrap();
        graph.borrow_mut().dispose();

        let report = coordinator.notify_pick(&scene, &PickInfo::hit(mesh));
        assert_eq!(report.fired_count(), 0);
        assert!(sink.entries().is_empty());
    }

    #[test]
    fn test_busy_graph_is_reported() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);
        let graph = coordinator.create_graph("g").unwrap();
        graph.borrow_mut().start().unwrap();

        let _held = graph.borrow_mut();
        let report = coordinator.notify_ready();
        assert_eq!(report.errors.len(), 1);
        assert!(matches!(report.errors[0].error, ExecutionError::GraphBusy(_)));
    }

    #[test]
    fn test_registry_one_coordinator_per_scene() {
        let mut first = Scene::new();
        let mut second = Scene::new();
        let mut registry = CoordinatorRegistry::new(FlowGraphConfig::default());

        let graph = registry
            .coordinator_for(&mut first)
            .create_graph("a")
            .unwrap();
        registry.coordinator_for(&mut first);
        registry.coordinator_for(&mut second);
        assert_eq!(registry.len(), 2);
        assert_eq!(first.observer_count(), 1);
        assert_eq!(registry.graphs_for(first.id()).len(), 1);

        assert!(registry.remove(&mut first));
        assert!(!registry.remove(&mut first));
        assert!(graph.borrow().is_disposed());
        assert_eq!(first.observer_count(), 0);
        assert!(registry.get(second.id()).is_some());
    }

    /// Sender graph whose scene-ready block sends `event_id` with `x = value`
    fn ready_sender(graph: &mut FlowGraph, event_id: &str, value: i64) {
        let schema = EventSchema::new().with_field("x", PortType::Int);
        let ready = graph.add_event_block(Block::scene_ready_event()).unwrap();
        let send = graph
            .add_block(
                Block::send_custom_event(event_id, schema).with_input_default("x", PortValue::Int(value)),
            )
            .unwrap();
        graph.connect(ready, ports::DONE, send, ports::IN).unwrap();
    }

    /// Receiver graph that logs field `x` of `event_id`
    fn logging_receiver(graph: &mut FlowGraph, event_id: &str) {
        let schema = EventSchema::new().with_field("x", PortType::Int);
        let receive = graph
            .add_event_block(Block::receive_custom_event(event_id, schema))
            .unwrap();
        let log = graph.add_block(Block::console_log()).unwrap();
        graph.connect(receive, ports::DONE, log, ports::IN).unwrap();
        graph.connect(receive, "x", log, ports::MESSAGE).unwrap();
    }

    #[test]
    fn test_dropped_graph_releases_declarations() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);

        let first = coordinator.create_graph("first").unwrap();
        first
            .borrow_mut()
            .add_block(Block::send_custom_event(
                "E",
                EventSchema::new().with_field("x", PortType::Float),
            ))
            .unwrap();
        assert_eq!(coordinator.custom_event_users("E"), 1);
        drop(first);
        assert_eq!(coordinator.custom_event_users("E"), 0);

        let second = coordinator.create_graph("second").unwrap();
        second
            .borrow_mut()
            .add_event_block(Block::receive_custom_event(
                "E",
                EventSchema::new().with_field("x", PortType::String),
            ))
            .unwrap();
        assert_eq!(coordinator.custom_event_users("E"), 1);
    }

    #[test]
    fn test_failed_load_releases_declarations() {
        let mut scene = Scene::new();
        let (mut coordinator, _sink) = setup(&mut scene);

        let descriptor = GraphDescriptor {
            name: "broken".to_string(),
            blocks: vec![
                Block::send_custom_event("E", EventSchema::new().with_field("x", PortType::Float)),
                Block::receive_custom_event("E", EventSchema::new().with_field("x", PortType::String)),
            ],
            connections: Vec::new(),
        };
        assert!(matches!(
            coordinator.create_graph_from(descriptor),
            Err(GraphError::CustomEvent(_))
        ));
        assert_eq!(coordinator.custom_event_users("E"), 0);
        assert!(coordinator.graphs().is_empty());
    }

    #[test]
    fn test_registry_custom_events_cross_scenes() {
        let mut first = Scene::new();
        let mut second = Scene::new();
        let sink = MemorySink::new();
        let mut registry =
            CoordinatorRegistry::with_sink(FlowGraphConfig::default(), Rc::new(sink.clone()));

        let sender = registry.coordinator_for(&mut first).create_graph("sender").unwrap();
        ready_sender(&mut sender.borrow_mut(), "E", 7);
        sender.borrow_mut().start().unwrap();

        let receiver = registry
            .coordinator_for(&mut second)
            .create_graph("receiver")
            .unwrap();
        logging_receiver(&mut receiver.borrow_mut(), "E");
        receiver.borrow_mut().start().unwrap();

        first.mark_ready();
        let report = registry.coordinator_for(&mut first).pump(&first);
        assert!(report.is_clean());
        assert_eq!(report.custom_events_delivered, 1);
        assert_eq!(sink.messages(), vec!["7"]);

        let payload = IndexMap::from([("x".to_string(), PortValue::Int(9))]);
        let report = registry.notify_custom_event("E", payload);
        assert!(report.is_clean());
        assert_eq!(sink.messages(), vec!["7", "9"]);
        assert_eq!(registry.custom_event_users("E"), 2);
    }

    #[test]
    fn test_standalone_coordinators_keep_events_apart() {
        let mut first = Scene::new();
        let mut second = Scene::new();
        let (mut sending, sink) = setup(&mut first);
        let (mut receiving, other_sink) = setup(&mut second);

        let receiver = receiving.create_graph("receiver").unwrap();
        logging_receiver(&mut receiver.borrow_mut(), "E");
        receiver.borrow_mut().start().unwrap();
        let _sender = sending.create_graph("sender").unwrap();

        let payload = IndexMap::from([("x".to_string(), PortValue::Int(1))]);
        sending.notify_custom_event("E", payload);
        assert!(sink.entries().is_empty());
        assert!(other_sink.entries().is_empty());
    }

    #[test]
    fn test_late_start_delivers_custom_events() {
        let mut scene = Scene::new();
        scene.mark_ready();
        let (mut coordinator, sink) = setup(&mut scene);

        let receiver = coordinator.create_graph("receiver").unwrap();
        logging_receiver(&mut receiver.borrow_mut(), "E");
        receiver.borrow_mut().start().unwrap();

        let sender = coordinator.create_graph("sender").unwrap();
        ready_sender(&mut sender.borrow_mut(), "E", 7);
        let report = sender.borrow_mut().start().unwrap();

        assert!(report.is_clean());
        assert_eq!(report.custom_events_delivered, 1);
        assert_eq!(sink.messages(), vec!["7"]);
        assert_eq!(coordinator.flush_custom_events().custom_events_delivered, 0);
    }

    #[test]
    fn test_late_start_delivers_to_itself() {
        let mut scene = Scene::new();
        scene.mark_ready();
        let (mut coordinator, sink) = setup(&mut scene);

        let graph = coordinator.create_graph("loopback").unwrap();
        let mut g = graph.borrow_mut();
        ready_sender(&mut g, "E", 3);
        logging_receiver(&mut g, "E");
        let report = g.start().unwrap();

        assert!(report.is_clean());
        assert_eq!(sink.messages(), vec!["3"]);
    }
}
