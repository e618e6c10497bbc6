// SPDX-License-Identifier: MIT OR Apache-2.0
//! Event-driven flow graphs for `OrdoPlay` scenes.
//!
//! Graphs are built from blocks joined by typed ports:
//! - Event blocks are entry points (scene ready, mesh pick, custom events)
//! - Execution blocks run when a signal reaches them
//! - Data blocks compute values lazily when an input pulls on them
//!
//! ## Architecture
//!
//! A [`Coordinator`] subscribes to one [`Scene`] and routes its notifications
//! to every graph created through it. Pointer picks bubble from the picked
//! mesh up through its ancestors. Custom events sent by one graph reach every
//! matching receiver under the same coordinator. All mutable run state lives
//! in an [`ExecutionContext`], so one graph can drive many isolated runs.

pub mod block;
pub mod config;
pub mod connection;
pub mod context;
pub mod coordinator;
pub mod custom_event;
pub mod dispatch;
pub mod execution;
pub mod graph;
pub mod port;
pub mod scene;
pub mod sink;

pub use block::{ports, ArithmeticOp, Block, BlockCapability, BlockId, BlockKind, NumericType};
pub use config::{BubblePolicy, ConfigError, FlowGraphConfig};
pub use connection::{Connection, ConnectionId, LinkKind};
pub use context::{ContextId, EventBlockState, ExecutionContext};
pub use coordinator::{Coordinator, CoordinatorRegistry};
pub use custom_event::{CustomEvent, CustomEventError, EventSchema};
pub use dispatch::{DispatchError, DispatchReport, FiredEvent};
pub use execution::ExecutionError;
pub use graph::{ConnectionError, FlowGraph, GraphDescriptor, GraphError, GraphId, GraphState};
pub use port::{Port, PortDirection, PortId, PortType, PortValue};
pub use scene::{Mesh, MeshId, PickInfo, Scene, SceneError, SceneEvent, SceneHierarchy, SceneId, Subscription};
pub use sink::{DiagnosticSink, MemorySink, TracingSink};
