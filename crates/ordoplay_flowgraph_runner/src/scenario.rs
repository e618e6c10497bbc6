// SPDX-License-Identifier: MIT OR Apache-2.0
//! Scenario files: a scene, the graphs wired against it, and the
//! notifications to replay.
//!
//! Scenarios refer to meshes and blocks by name, so a file can be written by
//! hand:
//!
//! ```ron
//! (
//!     meshes: [(name: "root"), (name: "child", parent: Some("root"))],
//!     graphs: [(
//!         name: "demo",
//!         blocks: {
//!             "pick": MeshPick(mesh: "root"),
//!             "log": ConsoleLog(message: Some(String("root picked"))),
//!         },
//!         links: [(from: ("pick", "done"), to: ("log", "in"))],
//!     )],
//!     steps: [Ready, Pick("child")],
//! )
//! ```

use indexmap::IndexMap;
use ordoplay_flowgraph::{
    ports, ArithmeticOp, Block, BlockId, Coordinator, DiagnosticSink, DispatchReport, EventSchema,
    FlowGraph, FlowGraphConfig, GraphError, MeshId, NumericType, PickInfo, PortType, PortValue,
    Scene, SceneError,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::rc::Rc;

/// A mesh in the scenario scene
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshSpec {
    /// Unique mesh name
    pub name: String,
    /// Name of the parent mesh
    #[serde(default)]
    pub parent: Option<String>,
}

/// A block declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BlockSpec {
    /// Fires once when the scene is ready
    SceneReady,
    /// Fires when `mesh` or one of its descendants is picked
    MeshPick {
        /// Bound mesh
        mesh: String,
        /// Stop bubbling after this block fires
        #[serde(default)]
        stop_propagation: bool,
    },
    /// Fires on a custom event
    ReceiveCustomEvent {
        /// Event channel
        event_id: String,
        /// Payload fields
        #[serde(default)]
        fields: IndexMap<String, PortType>,
    },
    /// Sends a custom event
    SendCustomEvent {
        /// Event channel
        event_id: String,
        /// Payload fields
        #[serde(default)]
        fields: IndexMap<String, PortType>,
        /// Literal payload values for unconnected fields
        #[serde(default)]
        values: IndexMap<String, PortValue>,
    },
    /// Logs its message
    ConsoleLog {
        /// Literal message when the input is unconnected
        #[serde(default)]
        message: Option<PortValue>,
    },
    /// Stores a value into a context variable
    SetVariable {
        /// Variable name
        variable: String,
    },
    /// Routes the signal on a condition
    Branch {
        /// Literal condition when the input is unconnected
        #[serde(default)]
        condition: Option<bool>,
    },
    /// Fires several outputs in order
    Sequence {
        /// Number of outputs
        outputs: usize,
    },
    /// Constant value
    Constant(PortValue),
    /// Reads a context variable
    GetVariable {
        /// Variable name
        variable: String,
        /// Variable type
        value_type: PortType,
    },
    /// Binary arithmetic
    Arithmetic {
        /// Operation
        op: ArithmeticOp,
        /// Operand type
        value_type: NumericType,
        /// Literal left operand
        #[serde(default)]
        a: Option<PortValue>,
        /// Literal right operand
        #[serde(default)]
        b: Option<PortValue>,
    },
}

/// A connection between two named block ports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Source block and output port
    pub from: (String, String),
    /// Target block and input port
    pub to: (String, String),
}

/// A graph declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSpec {
    /// Graph name
    pub name: String,
    /// Blocks by name, in creation order
    pub blocks: IndexMap<String, BlockSpec>,
    /// Connections, in connection order
    #[serde(default)]
    pub links: Vec<LinkSpec>,
}

/// One notification to replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Step {
    /// The scene becomes ready
    Ready,
    /// A pointer pick hits the named mesh
    Pick(String),
    /// A pointer pick hits nothing
    Miss,
    /// The host sends a custom event
    CustomEvent(String, IndexMap<String, PortValue>),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready => f.write_str("ready"),
            Self::Pick(mesh) => write!(f, "pick '{mesh}'"),
            Self::Miss => f.write_str("miss"),
            Self::CustomEvent(id, _) => write!(f, "custom event '{id}'"),
        }
    }
}

/// A complete scenario file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scene meshes
    #[serde(default)]
    pub meshes: Vec<MeshSpec>,
    /// Graphs, started in order
    #[serde(default)]
    pub graphs: Vec<GraphSpec>,
    /// Notifications, replayed in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Result of replaying one step
#[derive(Debug)]
pub struct StepOutcome {
    /// Human-readable step label
    pub label: String,
    /// What the dispatch did
    pub report: DispatchReport,
}

/// Scenario loading and wiring errors
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// File could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Content is not a valid scenario
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Mesh name not declared
    #[error("Unknown mesh '{0}'")]
    UnknownMesh(String),

    /// Mesh name declared twice
    #[error("Duplicate mesh '{0}'")]
    DuplicateMesh(String),

    /// Block name not declared in its graph
    #[error("Graph '{graph}' has no block '{block}'")]
    UnknownBlock {
        /// Graph name
        graph: String,
        /// Block name
        block: String,
    },

    /// Scene rejected an operation
    #[error(transparent)]
    Scene(#[from] SceneError),

    /// Graph rejected its declaration
    #[error("Graph '{graph}': {source}")]
    Graph {
        /// Graph name
        graph: String,
        /// Underlying error
        #[source]
        source: GraphError,
    },
}

impl Scenario {
    /// Parse from a RON string
    pub fn from_ron_str(content: &str) -> Result<Self, ScenarioError> {
        Ok(ron::from_str(content)?)
    }

    /// Load from a RON file
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path)?;
        let scenario = Self::from_ron_str(&content)?;
        tracing::debug!("Loaded scenario from {:?}", path);
        Ok(scenario)
    }

    /// Build the scene and graphs, then replay every step
    pub fn run(
        &self,
        config: FlowGraphConfig,
        sink: Rc<dyn DiagnosticSink>,
    ) -> Result<Vec<StepOutcome>, ScenarioError> {
        let mut scene = Scene::new();
        let meshes = self.build_scene(&mut scene)?;
        let mut coordinator = Coordinator::with_sink(&mut scene, config, sink);

        // The coordinator holds graphs weakly
        let mut graphs = Vec::with_capacity(self.graphs.len());
        for spec in &self.graphs {
            let graph = coordinator
                .create_graph(spec.name.clone())
                .map_err(|source| ScenarioError::Graph {
                    graph: spec.name.clone(),
                    source,
                })?;
            spec.build(&mut graph.borrow_mut(), &meshes)?;
            graphs.push(graph);
        }

        let mut outcomes = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let report = match step {
                Step::Ready => {
                    scene.mark_ready();
                    coordinator.pump(&scene)
                }
                Step::Pick(name) => {
                    let mesh = meshes
                        .get(name)
                        .copied()
                        .ok_or_else(|| ScenarioError::UnknownMesh(name.clone()))?;
                    scene.pick(mesh)?;
                    coordinator.pump(&scene)
                }
                Step::Miss => {
                    scene.emit_pick(PickInfo::miss());
                    coordinator.pump(&scene)
                }
                Step::CustomEvent(event_id, payload) => {
                    coordinator.notify_custom_event(event_id.clone(), payload.clone())
                }
            };
            tracing::debug!(step = %step, fired = report.fired_count(), "Replayed step");
            outcomes.push(StepOutcome {
                label: step.to_string(),
                report,
            });
        }

        coordinator.dispose(&mut scene);
        drop(graphs);
        Ok(outcomes)
    }

    fn build_scene(&self, scene: &mut Scene) -> Result<IndexMap<String, MeshId>, ScenarioError> {
        let mut meshes = IndexMap::new();
        for spec in &self.meshes {
            if meshes.contains_key(&spec.name) {
                return Err(ScenarioError::DuplicateMesh(spec.name.clone()));
            }
            let id = scene.add_mesh(spec.name.clone(), None)?;
            meshes.insert(spec.name.clone(), id);
        }

        // Parents may be declared after their children
        for spec in &self.meshes {
            let Some(parent) = &spec.parent else {
                continue;
            };
            let parent = meshes
                .get(parent)
                .copied()
                .ok_or_else(|| ScenarioError::UnknownMesh(parent.clone()))?;
            scene.set_parent(meshes[&spec.name], Some(parent))?;
        }
        Ok(meshes)
    }
}

impl GraphSpec {
    fn build(
        &self,
        graph: &mut FlowGraph,
        meshes: &IndexMap<String, MeshId>,
    ) -> Result<(), ScenarioError> {
        let wrap = |source: GraphError| ScenarioError::Graph {
            graph: self.name.clone(),
            source,
        };

        let mut ids: IndexMap<&str, BlockId> = IndexMap::new();
        for (name, spec) in &self.blocks {
            let block = spec.to_block(meshes)?.with_name(name.clone());
            let id = graph.add_block(block).map_err(wrap)?;
            ids.insert(name.as_str(), id);
        }

        let lookup = |name: &str| {
            ids.get(name).copied().ok_or_else(|| ScenarioError::UnknownBlock {
                graph: self.name.clone(),
                block: name.to_string(),
            })
        };
        for link in &self.links {
            let from = lookup(&link.from.0)?;
            let to = lookup(&link.to.0)?;
            graph
                .connect(from, &link.from.1, to, &link.to.1)
                .map_err(wrap)?;
        }

        graph.start().map_err(wrap)?;
        Ok(())
    }
}

impl BlockSpec {
    fn to_block(&self, meshes: &IndexMap<String, MeshId>) -> Result<Block, ScenarioError> {
        let schema = |fields: &IndexMap<String, PortType>| {
            fields
                .iter()
                .fold(EventSchema::new(), |schema, (name, ty)| {
                    schema.with_field(name.clone(), ty.clone())
                })
        };

        let block = match self {
            Self::SceneReady => Block::scene_ready_event(),
            Self::MeshPick {
                mesh,
                stop_propagation,
            } => {
                let mesh = meshes
                    .get(mesh)
                    .copied()
                    .ok_or_else(|| ScenarioError::UnknownMesh(mesh.clone()))?;
                Block::mesh_pick_event(mesh).with_stop_propagation(*stop_propagation)
            }
            Self::ReceiveCustomEvent { event_id, fields } => {
                Block::receive_custom_event(event_id.clone(), schema(fields))
            }
            Self::SendCustomEvent {
                event_id,
                fields,
                values,
            } => values.iter().fold(
                Block::send_custom_event(event_id.clone(), schema(fields)),
                |block, (field, value)| block.with_input_default(field, value.clone()),
            ),
            Self::ConsoleLog { message } => {
                with_literal(Block::console_log(), ports::MESSAGE, message.clone())
            }
            Self::SetVariable { variable } => Block::set_variable(variable.clone()),
            Self::Branch { condition } => {
                with_literal(Block::branch(), ports::CONDITION, condition.map(PortValue::Bool))
            }
            Self::Sequence { outputs } => Block::sequence(*outputs),
            Self::Constant(value) => Block::constant(value.clone()),
            Self::GetVariable {
                variable,
                value_type,
            } => Block::get_variable(variable.clone(), value_type.clone()),
            Self::Arithmetic {
                op,
                value_type,
                a,
                b,
            } => {
                let block = with_literal(Block::arithmetic(*op, *value_type), ports::A, a.clone());
                with_literal(block, ports::B, b.clone())
            }
        };
        Ok(block)
    }
}

fn with_literal(block: Block, port: &str, value: Option<PortValue>) -> Block {
    match value {
        Some(value) => block.with_input_default(port, value),
        None => block,
    }
}
