/*!
The state machine model: an arena-allocated tree of regions, vertices, and transitions.

The model is built through the construction methods and cursors, compiled once with
[`Model::initialise`], and read-only thereafter; any structural mutation marks it dirty and the
next evaluation re-compiles. Elements are addressed by copyable ids that are only meaningful for
the model that produced them.

A state with at least one child region is *composite*; with two or more it is *orthogonal*.
States whose vertices are added directly (passing a `VertexId` as the parent) obtain one implicit
region named `"default"`.
*/

use crate::behavior::{GuardFn, Trigger, UserAction};
use crate::compile::{compile, Compiled, Ctx};
use crate::error::{ErrorKind, Result};
use crate::runtime::Instance;
use crate::tag::namespace_separator;
use rand::Rng;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Identifies a vertex (the root machine, a state, a final state, or a pseudo-state) within the
/// model that created it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(usize);

///
/// Identifies a region within the model that created it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(usize);

///
/// Identifies a transition within the model that created it.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PseudoStateKind {
    Initial,
    ShallowHistory,
    DeepHistory,
    Choice,
    Junction,
    Terminate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VertexKind {
    /// The root state machine.
    Machine,
    State,
    Final,
    Pseudo(PseudoStateKind),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransitionKind {
    Internal,
    Local,
    External,
}

///
/// Where a new vertex or region attaches. Built from a `RegionId` (used as given) or a
/// `VertexId` (resolved to the state's `"default"` region, creating it if needed); nothing else
/// can be a parent.
///
#[derive(Clone, Copy, Debug)]
pub enum Parent {
    State(VertexId),
    Region(RegionId),
}

///
/// The injectable knobs of the engine, carried by the model and read during compilation and
/// branch selection. Replacing the configuration marks the model dirty.
///
#[derive(Clone)]
pub struct EngineConfig {
    /// When set, an internal transition additionally tests its source for completeness and
    /// dispatches the completion event. Off by default.
    pub internal_transitions_trigger_completion: bool,
    /// Uniform selection over `[0, max)` used by choice pseudo-states.
    pub random: Rc<dyn Fn(usize) -> usize>,
}

// ------------------------------------------------------------------------------------------------

pub(crate) enum Guard<M> {
    /// The constant-true guard; the default, and the only guard an initial transition may carry.
    Always,
    /// The else sentinel, legal only out of choice and junction pseudo-states.
    Else,
    When(GuardFn<M>),
}

pub(crate) struct VertexRecord<M> {
    pub(crate) name: String,
    pub(crate) kind: VertexKind,
    pub(crate) parent: Option<RegionId>,
    pub(crate) regions: Vec<RegionId>,
    pub(crate) outgoing: Vec<TransitionId>,
    pub(crate) incoming: Vec<TransitionId>,
    pub(crate) entry: Vec<UserAction<M>>,
    pub(crate) exit: Vec<UserAction<M>>,
    pub(crate) removed: bool,
}

pub(crate) struct RegionRecord {
    pub(crate) name: String,
    pub(crate) state: VertexId,
    pub(crate) vertices: Vec<VertexId>,
    pub(crate) removed: bool,
}

pub(crate) struct TransitionRecord<M> {
    pub(crate) source: VertexId,
    pub(crate) target: Option<VertexId>,
    pub(crate) kind: TransitionKind,
    pub(crate) guard: Guard<M>,
    pub(crate) effects: Vec<UserAction<M>>,
    pub(crate) removed: bool,
}

///
/// The model itself: the root machine vertex plus the arenas holding every element it owns.
///
pub struct Model<M> {
    root: VertexId,
    pub(crate) vertices: Vec<VertexRecord<M>>,
    pub(crate) regions: Vec<RegionRecord>,
    pub(crate) transitions: Vec<TransitionRecord<M>>,
    config: EngineConfig,
    dirty: bool,
    compiled: Option<Compiled<M>>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl VertexId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl RegionId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

impl TransitionId {
    pub(crate) fn index(self) -> usize {
        self.0
    }
}

// ------------------------------------------------------------------------------------------------

impl PseudoStateKind {
    ///
    /// An initial-family kind: the vertex a region enters by default.
    ///
    pub fn is_initial(self) -> bool {
        match self {
            PseudoStateKind::Initial
            | PseudoStateKind::ShallowHistory
            | PseudoStateKind::DeepHistory => true,
            _ => false,
        }
    }

    pub fn is_history(self) -> bool {
        match self {
            PseudoStateKind::ShallowHistory | PseudoStateKind::DeepHistory => true,
            _ => false,
        }
    }

    ///
    /// A multi-way branch resolved by guard selection: choice (dynamic) or junction (static).
    ///
    pub fn is_branch(self) -> bool {
        match self {
            PseudoStateKind::Choice | PseudoStateKind::Junction => true,
            _ => false,
        }
    }
}

impl VertexKind {
    pub fn is_state(self) -> bool {
        match self {
            VertexKind::Machine | VertexKind::State | VertexKind::Final => true,
            _ => false,
        }
    }

    pub fn is_final(self) -> bool {
        match self {
            VertexKind::Final => true,
            _ => false,
        }
    }

    pub fn pseudo(self) -> Option<PseudoStateKind> {
        match self {
            VertexKind::Pseudo(kind) => Some(kind),
            _ => None,
        }
    }
}

impl TransitionKind {
    pub fn is_internal(self) -> bool {
        match self {
            TransitionKind::Internal => true,
            _ => false,
        }
    }

    pub fn is_local(self) -> bool {
        match self {
            TransitionKind::Local => true,
            _ => false,
        }
    }

    pub fn is_external(self) -> bool {
        match self {
            TransitionKind::External => true,
            _ => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------

impl From<VertexId> for Parent {
    fn from(state: VertexId) -> Self {
        Parent::State(state)
    }
}

impl From<RegionId> for Parent {
    fn from(region: RegionId) -> Self {
        Parent::Region(region)
    }
}

// ------------------------------------------------------------------------------------------------

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            internal_transitions_trigger_completion: false,
            random: Rc::new(|max| {
                if max < 2 {
                    0
                } else {
                    rand::thread_rng().gen_range(0..max)
                }
            }),
        }
    }
}

impl Debug for EngineConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field(
                "internal_transitions_trigger_completion",
                &self.internal_transitions_trigger_completion,
            )
            .field("random", &String::from(".."))
            .finish()
    }
}

// ------------------------------------------------------------------------------------------------

impl<M> Guard<M> {
    pub(crate) fn passes(&self, trigger: Trigger<'_, M>, instance: &dyn Instance) -> bool {
        match self {
            Guard::Always => true,
            Guard::Else => false,
            Guard::When(guard) => guard(trigger, instance),
        }
    }

    pub(crate) fn is_else(&self) -> bool {
        match self {
            Guard::Else => true,
            _ => false,
        }
    }

    pub(crate) fn is_trivial(&self) -> bool {
        match self {
            Guard::Always => true,
            _ => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------

impl<M: 'static> Debug for Model<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name())
            .field("vertices", &format!("[..{}]", self.vertices.len()))
            .field("regions", &format!("[..{}]", self.regions.len()))
            .field("transitions", &format!("[..{}]", self.transitions.len()))
            .field("config", &self.config)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl<M: 'static> Model<M> {
    ///
    /// Create a model whose root machine vertex carries the given name.
    ///
    pub fn new(name: &str) -> Self {
        Self {
            root: VertexId(0),
            vertices: vec![VertexRecord {
                name: name.to_string(),
                kind: VertexKind::Machine,
                parent: None,
                regions: Vec::new(),
                outgoing: Vec::new(),
                incoming: Vec::new(),
                entry: Vec::new(),
                exit: Vec::new(),
                removed: false,
            }],
            regions: Vec::new(),
            transitions: Vec::new(),
            config: EngineConfig::default(),
            dirty: true,
            compiled: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.vertices[self.root.index()].name
    }

    pub fn root(&self) -> VertexId {
        self.root
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    // --------------------------------------------------------------------------------------------

    pub fn add_region(&mut self, state: VertexId, name: &str) -> RegionId {
        let id = RegionId(self.regions.len());
        self.regions.push(RegionRecord {
            name: name.to_string(),
            state,
            vertices: Vec::new(),
            removed: false,
        });
        self.vertices[state.index()].regions.push(id);
        self.dirty = true;
        id
    }

    ///
    /// The state's region named `"default"`, created on first use. This is the region vertices
    /// land in when a state is given as a parent directly.
    ///
    pub fn default_region(&mut self, state: VertexId) -> RegionId {
        let existing = self.vertices[state.index()]
            .regions
            .iter()
            .copied()
            .find(|region| self.regions[region.index()].name == DEFAULT_REGION_NAME);
        match existing {
            Some(region) => region,
            None => self.add_region(state, DEFAULT_REGION_NAME),
        }
    }

    pub fn add_state(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_vertex(parent.into(), name, VertexKind::State)
    }

    pub fn add_final_state(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_vertex(parent.into(), name, VertexKind::Final)
    }

    pub fn add_pseudo_state(
        &mut self,
        parent: impl Into<Parent>,
        name: &str,
        kind: PseudoStateKind,
    ) -> VertexId {
        self.add_vertex(parent.into(), name, VertexKind::Pseudo(kind))
    }

    pub fn add_initial(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::Initial)
    }

    pub fn add_shallow_history(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::ShallowHistory)
    }

    pub fn add_deep_history(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::DeepHistory)
    }

    pub fn add_choice(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::Choice)
    }

    pub fn add_junction(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::Junction)
    }

    pub fn add_terminate(&mut self, parent: impl Into<Parent>, name: &str) -> VertexId {
        self.add_pseudo_state(parent, name, PseudoStateKind::Terminate)
    }

    fn add_vertex(&mut self, parent: Parent, name: &str, kind: VertexKind) -> VertexId {
        let region = match parent {
            Parent::Region(region) => region,
            Parent::State(state) => self.default_region(state),
        };
        let id = VertexId(self.vertices.len());
        self.vertices.push(VertexRecord {
            name: name.to_string(),
            kind,
            parent: Some(region),
            regions: Vec::new(),
            outgoing: Vec::new(),
            incoming: Vec::new(),
            entry: Vec::new(),
            exit: Vec::new(),
            removed: false,
        });
        self.regions[region.index()].vertices.push(id);
        self.dirty = true;
        id
    }

    ///
    /// Create a transition. A transition without a target is forced to kind `Internal`
    /// regardless of the kind given.
    ///
    pub fn add_transition(
        &mut self,
        source: VertexId,
        target: Option<VertexId>,
        kind: TransitionKind,
    ) -> TransitionId {
        let kind = if target.is_none() {
            TransitionKind::Internal
        } else {
            kind
        };
        let id = TransitionId(self.transitions.len());
        self.transitions.push(TransitionRecord {
            source,
            target,
            kind,
            guard: Guard::Always,
            effects: Vec::new(),
            removed: false,
        });
        self.vertices[source.index()].outgoing.push(id);
        if let Some(target) = target {
            self.vertices[target.index()].incoming.push(id);
        }
        self.dirty = true;
        id
    }

    // --------------------------------------------------------------------------------------------

    ///
    /// Remove a transition from the model.
    ///
    pub fn remove_transition(&mut self, transition: TransitionId) {
        if self.transitions[transition.index()].removed {
            return;
        }
        let source = self.transitions[transition.index()].source;
        let target = self.transitions[transition.index()].target;
        self.vertices[source.index()]
            .outgoing
            .retain(|id| *id != transition);
        if let Some(target) = target {
            self.vertices[target.index()]
                .incoming
                .retain(|id| *id != transition);
        }
        self.transitions[transition.index()].removed = true;
        self.dirty = true;
    }

    ///
    /// Remove a vertex, its child regions, and every transition incident to it. The root machine
    /// vertex cannot be removed.
    ///
    pub fn remove_vertex(&mut self, vertex: VertexId) {
        if vertex == self.root || self.vertices[vertex.index()].removed {
            return;
        }
        for region in self.vertices[vertex.index()].regions.clone() {
            self.remove_region(region);
        }
        for transition in self.vertices[vertex.index()].outgoing.clone() {
            self.remove_transition(transition);
        }
        for transition in self.vertices[vertex.index()].incoming.clone() {
            self.remove_transition(transition);
        }
        if let Some(parent) = self.vertices[vertex.index()].parent {
            self.regions[parent.index()].vertices.retain(|id| *id != vertex);
        }
        self.vertices[vertex.index()].removed = true;
        self.dirty = true;
    }

    ///
    /// Remove a region and everything within it.
    ///
    pub fn remove_region(&mut self, region: RegionId) {
        if self.regions[region.index()].removed {
            return;
        }
        for vertex in self.regions[region.index()].vertices.clone() {
            self.remove_vertex(vertex);
        }
        let state = self.regions[region.index()].state;
        self.vertices[state.index()].regions.retain(|id| *id != region);
        self.regions[region.index()].removed = true;
        self.dirty = true;
    }

    // --------------------------------------------------------------------------------------------

    pub fn vertex_name(&self, vertex: VertexId) -> &str {
        &self.vertices[vertex.index()].name
    }

    pub fn region_name(&self, region: RegionId) -> &str {
        &self.regions[region.index()].name
    }

    pub fn vertex_kind(&self, vertex: VertexId) -> VertexKind {
        self.vertices[vertex.index()].kind
    }

    ///
    /// The region containing this vertex; `None` only for the root machine.
    ///
    pub fn parent_region(&self, vertex: VertexId) -> Option<RegionId> {
        self.vertices[vertex.index()].parent
    }

    ///
    /// The state owning this region.
    ///
    pub fn region_state(&self, region: RegionId) -> VertexId {
        self.regions[region.index()].state
    }

    pub fn regions_of(&self, vertex: VertexId) -> &[RegionId] {
        &self.vertices[vertex.index()].regions
    }

    pub fn vertices_in(&self, region: RegionId) -> &[VertexId] {
        &self.regions[region.index()].vertices
    }

    pub fn outgoing(&self, vertex: VertexId) -> &[TransitionId] {
        &self.vertices[vertex.index()].outgoing
    }

    pub fn incoming(&self, vertex: VertexId) -> &[TransitionId] {
        &self.vertices[vertex.index()].incoming
    }

    pub fn transition_source(&self, transition: TransitionId) -> VertexId {
        self.transitions[transition.index()].source
    }

    pub fn transition_target(&self, transition: TransitionId) -> Option<VertexId> {
        self.transitions[transition.index()].target
    }

    pub fn transition_kind(&self, transition: TransitionId) -> TransitionKind {
        self.transitions[transition.index()].kind
    }

    pub fn is_simple(&self, vertex: VertexId) -> bool {
        self.vertices[vertex.index()].kind.is_state() && self.regions_of(vertex).is_empty()
    }

    pub fn is_composite(&self, vertex: VertexId) -> bool {
        self.vertices[vertex.index()].kind.is_state() && !self.regions_of(vertex).is_empty()
    }

    pub fn is_orthogonal(&self, vertex: VertexId) -> bool {
        self.vertices[vertex.index()].kind.is_state() && self.regions_of(vertex).len() > 1
    }

    // --------------------------------------------------------------------------------------------

    ///
    /// The root-to-vertex path, both ends inclusive.
    ///
    pub fn ancestry(&self, vertex: VertexId) -> Vec<VertexId> {
        let mut path = Vec::new();
        let mut current = Some(vertex);
        while let Some(vertex) = current {
            path.push(vertex);
            current = self.parent_region(vertex).map(|region| self.region_state(region));
        }
        path.reverse();
        path
    }

    ///
    /// The greatest index at which the two ancestries still agree, or `None` when the vertices
    /// are not rooted in the same machine.
    ///
    pub fn lca(&self, left: VertexId, right: VertexId) -> Option<usize> {
        let left = self.ancestry(left);
        let right = self.ancestry(right);
        if left[0] != right[0] {
            return None;
        }
        let mut common = 0;
        while common + 1 < left.len() && common + 1 < right.len() && left[common + 1] == right[common + 1]
        {
            common += 1;
        }
        Some(common)
    }

    ///
    /// The dotted root-to-self path of a vertex, using the process-wide separator.
    ///
    pub fn qualified_name(&self, vertex: VertexId) -> String {
        match self.parent_region(vertex) {
            None => self.vertices[vertex.index()].name.clone(),
            Some(region) => format!(
                "{}{}{}",
                self.region_qualified_name(region),
                namespace_separator(),
                self.vertices[vertex.index()].name
            ),
        }
    }

    pub fn region_qualified_name(&self, region: RegionId) -> String {
        format!(
            "{}{}{}",
            self.qualified_name(self.region_state(region)),
            namespace_separator(),
            self.regions[region.index()].name
        )
    }

    // --------------------------------------------------------------------------------------------

    ///
    /// Compile the model: synthesise the behavior sequences every element and transition is
    /// driven by, and clear the dirty flag. Idempotent; called automatically by the evaluator
    /// when the model is dirty.
    ///
    pub fn initialise(&mut self) {
        debug!("Model::initialise `{}`", self.name());
        let compiled = compile(self);
        self.compiled = Some(compiled);
        self.dirty = false;
    }

    pub(crate) fn ctx(&self) -> Result<Ctx<'_, M>> {
        match &self.compiled {
            Some(compiled) => Ok(Ctx {
                model: self,
                compiled,
            }),
            None => Err(ErrorKind::NotInitialised.into()),
        }
    }

    ///
    /// The first initial-family pseudo-state of a region, in declaration order.
    ///
    pub(crate) fn region_initial(&self, region: RegionId) -> Option<VertexId> {
        self.regions[region.index()]
            .vertices
            .iter()
            .copied()
            .find(|vertex| match self.vertices[vertex.index()].kind {
                VertexKind::Pseudo(kind) => kind.is_initial(),
                _ => false,
            })
    }

    pub(crate) fn else_transition(&self, vertex: VertexId) -> Option<TransitionId> {
        self.vertices[vertex.index()]
            .outgoing
            .iter()
            .copied()
            .find(|transition| self.transitions[transition.index()].guard.is_else())
    }
}

// ------------------------------------------------------------------------------------------------
// Private Types
// ------------------------------------------------------------------------------------------------

const DEFAULT_REGION_NAME: &str = "default";

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

mod builder;
pub use builder::{StateCursor, TransitionCursor};

pub mod validate;

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
