/*!
The compilation pass: walks the model once and synthesises, for every region and vertex, the
ordered `leave` / `begin_enter` / `end_enter` behavior sequences, and for every transition the
`on_traverse` sequence the evaluator drives.

Composition happens at compile time wherever the path is static (external transitions, plain
initial entry) and falls back to small runtime hooks where it cannot be (history replay, local
transitions, regions under a deep history). The visitor threads a single `deep_history_above`
flag down the tree; everything else the hooks need at runtime they look up through the compiled
context.
*/

use crate::behavior::{Behavior, Trigger, UserAction};
use crate::error::Result;
use crate::model::{Model, PseudoStateKind, RegionId, TransitionKind, TransitionRecord, VertexId, VertexKind};
use crate::runtime::{evaluate_state, is_active, is_complete, traverse, Instance};
use log::Level;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// The four behavior sequences compiled for one element. `enter` is always materialised fresh so
/// no compiled product aliases another's sequence.
///
pub(crate) struct ElementBehavior<M> {
    pub(crate) leave: Behavior<M>,
    pub(crate) begin_enter: Behavior<M>,
    pub(crate) end_enter: Behavior<M>,
}

///
/// Everything the compilation pass produced; owned by the model and replaced wholesale on
/// re-compilation.
///
pub(crate) struct Compiled<M> {
    pub(crate) vertices: Vec<ElementBehavior<M>>,
    pub(crate) regions: Vec<ElementBehavior<M>>,
    pub(crate) traversals: Vec<Behavior<M>>,
    pub(crate) on_initialise: Behavior<M>,
}

///
/// The read-only pair every compiled action and evaluator step receives.
///
pub(crate) struct Ctx<'a, M> {
    pub(crate) model: &'a Model<M>,
    pub(crate) compiled: &'a Compiled<M>,
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

pub(crate) fn compile<M: 'static>(model: &Model<M>) -> Compiled<M> {
    let mut compiler = Compiler {
        model,
        vertices: (0..model.vertices.len()).map(|_| Default::default()).collect(),
        regions: (0..model.regions.len()).map(|_| Default::default()).collect(),
        log_hooks: log_enabled!(Level::Debug),
    };
    compiler.visit_vertex(model.root(), false);
    let traversals = compiler.compile_transitions();
    let on_initialise = compiler.vertices[model.root().index()].enter();
    Compiled {
        vertices: compiler.vertices,
        regions: compiler.regions,
        traversals,
        on_initialise,
    }
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl<M> Default for ElementBehavior<M> {
    fn default() -> Self {
        Self {
            leave: Default::default(),
            begin_enter: Default::default(),
            end_enter: Default::default(),
        }
    }
}

impl<M> ElementBehavior<M> {
    pub(crate) fn enter(&self) -> Behavior<M> {
        let mut enter = self.begin_enter.clone();
        enter.append(&self.end_enter);
        enter
    }
}

// ------------------------------------------------------------------------------------------------

impl<'a, M> Clone for Ctx<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M> Copy for Ctx<'a, M> {}

// ------------------------------------------------------------------------------------------------
// Private Types
// ------------------------------------------------------------------------------------------------

struct Compiler<'m, M> {
    model: &'m Model<M>,
    vertices: Vec<ElementBehavior<M>>,
    regions: Vec<ElementBehavior<M>>,
    log_hooks: bool,
}

impl<'m, M: 'static> Compiler<'m, M> {
    fn visit_vertex(&mut self, vertex: VertexId, deep_history_above: bool) {
        match self.model.vertex_kind(vertex) {
            VertexKind::Pseudo(kind) => self.visit_pseudo_state(vertex, kind),
            _ => self.visit_state(vertex, deep_history_above),
        }
    }

    ///
    /// Observability hooks common to every element, appended only when a debug-level logger is
    /// installed at compilation time.
    ///
    fn visit_vertex_element(&mut self, vertex: VertexId) {
        if !self.log_hooks {
            return;
        }
        let leaving = self.model.qualified_name(vertex);
        let entering = leaving.clone();
        self.vertices[vertex.index()].leave.push(move |_, _, _, _| {
            debug!("leave {}", leaving);
            Ok(())
        });
        self.vertices[vertex.index()]
            .begin_enter
            .push(move |_, _, _, _| {
                debug!("enter {}", entering);
                Ok(())
            });
    }

    fn visit_region_element(&mut self, region: RegionId) {
        if !self.log_hooks {
            return;
        }
        let leaving = self.model.region_qualified_name(region);
        let entering = leaving.clone();
        self.regions[region.index()].leave.push(move |_, _, _, _| {
            debug!("leave {}", leaving);
            Ok(())
        });
        self.regions[region.index()]
            .begin_enter
            .push(move |_, _, _, _| {
                debug!("enter {}", entering);
                Ok(())
            });
    }

    fn visit_region(&mut self, region: RegionId, deep_history_above: bool) {
        self.visit_region_element(region);

        let initial = self.model.region_initial(region);
        let initial_kind = initial.and_then(|vertex| self.model.vertex_kind(vertex).pseudo());
        let history_initial = initial_kind.map(|kind| kind.is_history()).unwrap_or(false);
        let deep_below =
            deep_history_above || initial_kind == Some(PseudoStateKind::DeepHistory);

        for vertex in self.model.vertices_in(region).to_vec() {
            self.visit_vertex(vertex, deep_below);
        }

        // leaving the region exits whichever child the instance records as active
        self.regions[region.index()]
            .leave
            .push(move |ctx, trigger, instance, _| {
                if let Some(current) = instance.current(region) {
                    ctx.compiled.vertices[current.index()]
                        .leave
                        .invoke(ctx, trigger, instance, false)?;
                }
                Ok(())
            });

        if deep_history_above || initial.is_none() || history_initial {
            // the vertex to enter is only known at runtime: the remembered state when replaying
            // history, the initial vertex otherwise
            let deep_kind = initial_kind == Some(PseudoStateKind::DeepHistory);
            let qualified = self.model.region_qualified_name(region);
            self.regions[region.index()].end_enter.push(
                move |ctx, trigger, instance, history| {
                    let starting = if history || history_initial {
                        instance.current(region).or(initial)
                    } else {
                        initial
                    };
                    match starting {
                        Some(vertex) => {
                            let deep = history || deep_kind;
                            let entering = &ctx.compiled.vertices[vertex.index()];
                            entering.begin_enter.invoke(ctx, trigger, instance, deep)?;
                            entering.end_enter.invoke(ctx, trigger, instance, deep)
                        }
                        None => {
                            warn!("region `{}` has nothing to enter", qualified);
                            Ok(())
                        }
                    }
                },
            );
        } else if let Some(initial) = initial {
            // a plain initial under no history: its entry is a static prefix
            let enter = self.vertices[initial.index()].enter();
            self.regions[region.index()].end_enter.append(&enter);
        }
    }

    fn visit_pseudo_state(&mut self, vertex: VertexId, kind: PseudoStateKind) {
        self.visit_vertex_element(vertex);
        match kind {
            PseudoStateKind::Initial => {
                let qualified = self.model.qualified_name(vertex);
                self.vertices[vertex.index()].end_enter.push(
                    move |ctx, trigger, instance, _| {
                        match ctx.model.outgoing(vertex).first() {
                            Some(transition) => {
                                let _ = traverse(ctx, *transition, instance, trigger)?;
                                Ok(())
                            }
                            None => {
                                warn!(
                                    "initial pseudo-state `{}` has no outgoing transition",
                                    qualified
                                );
                                Ok(())
                            }
                        }
                    },
                );
            }
            PseudoStateKind::ShallowHistory | PseudoStateKind::DeepHistory => {
                if let Some(region) = self.model.parent_region(vertex) {
                    let deep_kind = kind == PseudoStateKind::DeepHistory;
                    let qualified = self.model.qualified_name(vertex);
                    self.vertices[vertex.index()].end_enter.push(
                        move |ctx, trigger, instance, history| {
                            if let Some(remembered) = instance.current(region) {
                                // history replay: step out of the pseudo-state and re-enter the
                                // remembered state instead
                                ctx.compiled.vertices[vertex.index()]
                                    .leave
                                    .invoke(ctx, trigger, instance, false)?;
                                let deep = history || deep_kind;
                                let entering = &ctx.compiled.vertices[remembered.index()];
                                entering.begin_enter.invoke(ctx, trigger, instance, deep)?;
                                entering.end_enter.invoke(ctx, trigger, instance, deep)
                            } else {
                                match ctx.model.outgoing(vertex).first() {
                                    Some(transition) => {
                                        let _ = traverse(ctx, *transition, instance, trigger)?;
                                        Ok(())
                                    }
                                    None => {
                                        warn!(
                                            "history pseudo-state `{}` has no stored state and no default transition",
                                            qualified
                                        );
                                        Ok(())
                                    }
                                }
                            }
                        },
                    );
                }
            }
            PseudoStateKind::Terminate => {
                self.vertices[vertex.index()]
                    .begin_enter
                    .push(|_, _, instance, _| {
                        instance.terminate();
                        Ok(())
                    });
            }
            PseudoStateKind::Choice | PseudoStateKind::Junction => {}
        }
    }

    ///
    /// States visit their regions by hand so the region sequences concatenate into the state's
    /// own, then layer the user behavior and the current-state bookkeeping on top.
    ///
    fn visit_state(&mut self, vertex: VertexId, deep_history_above: bool) {
        for region in self.model.regions_of(vertex).to_vec() {
            self.visit_region(region, deep_history_above);
            let leave = self.regions[region.index()].leave.clone();
            let enter = self.regions[region.index()].enter();
            let state = &mut self.vertices[vertex.index()];
            state.leave.append(&leave);
            state.end_enter.append(&enter);
        }
        self.visit_vertex_element(vertex);
        for action in self.model.vertices[vertex.index()].exit.clone() {
            self.vertices[vertex.index()].leave.push(lift(action));
        }
        for action in self.model.vertices[vertex.index()].entry.clone() {
            self.vertices[vertex.index()].begin_enter.push(lift(action));
        }
        if let Some(region) = self.model.parent_region(vertex) {
            self.vertices[vertex.index()]
                .begin_enter
                .push(move |_, _, instance, _| {
                    instance.set_current(region, vertex);
                    Ok(())
                });
        }
    }

    // --------------------------------------------------------------------------------------------

    fn compile_transitions(&self) -> Vec<Behavior<M>> {
        self.model
            .transitions
            .iter()
            .map(|record| {
                if record.removed {
                    return Behavior::default();
                }
                match (record.target, record.kind) {
                    (None, _) | (_, TransitionKind::Internal) => self.compile_internal(record),
                    (Some(target), TransitionKind::Local) => self.compile_local(record, target),
                    (Some(target), TransitionKind::External) => {
                        self.compile_external(record, target)
                    }
                }
            })
            .collect()
    }

    fn compile_internal(&self, record: &TransitionRecord<M>) -> Behavior<M> {
        let mut sequence = Behavior::default();
        for action in record.effects.clone() {
            sequence.push(lift(action));
        }
        if self.model.config().internal_transitions_trigger_completion {
            let source = record.source;
            sequence.push(move |ctx, _, instance, _| {
                if is_complete(ctx.model, source, instance) {
                    let _ = evaluate_state(ctx, source, instance, Trigger::Completion(source))?;
                }
                Ok(())
            });
        }
        sequence
    }

    ///
    /// External: exit up to (excluding) the least common ancestor, run the effect, then cascade
    /// down the target's ancestry. The whole path is known now, so the sequence is composed
    /// statically.
    ///
    fn compile_external(&self, record: &TransitionRecord<M>, target: VertexId) -> Behavior<M> {
        let source_path = self.model.ancestry(record.source);
        let target_path = self.model.ancestry(target);
        let mut index = source_path.len().min(target_path.len()) - 1;
        while index > 0 && source_path[index - 1] != target_path[index - 1] {
            index -= 1;
        }

        let mut sequence = Behavior::default();
        sequence.append(&self.vertices[source_path[index].index()].leave);
        for action in record.effects.clone() {
            sequence.push(lift(action));
        }
        let mut step = index;
        while step < target_path.len() {
            let element = target_path[step];
            let next = target_path.get(step + 1).copied();
            self.cascade_entry(&mut sequence, element, next);
            step += 1;
        }
        sequence.append(&self.vertices[target.index()].end_enter);
        sequence
    }

    ///
    /// Begin entering `element`; when the path continues into a composite, orthogonal sibling
    /// regions enter fully while the region on the path is begun only — the next cascade step
    /// supplies its vertex.
    ///
    fn cascade_entry(&self, sequence: &mut Behavior<M>, element: VertexId, next: Option<VertexId>) {
        sequence.append(&self.vertices[element.index()].begin_enter);
        if let Some(next) = next {
            if self.model.is_composite(element) {
                let path_region = self.model.parent_region(next);
                for region in self.model.regions_of(element) {
                    sequence.append(&self.regions[region.index()].begin_enter);
                    if Some(*region) != path_region {
                        sequence.append(&self.regions[region.index()].end_enter);
                    }
                }
            }
        }
    }

    ///
    /// Local: the first ancestor of the target that is not active is only known at runtime, so
    /// the whole traversal is one composite hook mirroring the external shape.
    ///
    fn compile_local(&self, record: &TransitionRecord<M>, target: VertexId) -> Behavior<M> {
        let effects = record.effects.clone();
        let mut sequence = Behavior::default();
        sequence.push(
            move |ctx, trigger, instance, _| {
                let target_path = ctx.model.ancestry(target);
                let mut index = 0;
                while index < target_path.len()
                    && is_active(ctx.model, target_path[index], instance)
                {
                    index += 1;
                }
                if index == target_path.len() {
                    // the target itself is active: converge by re-entering it
                    index = target_path.len() - 1;
                }
                if let Some(region) = ctx.model.parent_region(target_path[index]) {
                    if let Some(current) = instance.current(region) {
                        ctx.compiled.vertices[current.index()]
                            .leave
                            .invoke(ctx, trigger, instance, false)?;
                    }
                }
                for action in &effects {
                    action(trigger, instance);
                }
                let mut step = index;
                while step < target_path.len() {
                    let element = target_path[step];
                    let next = target_path.get(step + 1).copied();
                    ctx.compiled.vertices[element.index()]
                        .begin_enter
                        .invoke(ctx, trigger, instance, false)?;
                    if let Some(next) = next {
                        if ctx.model.is_composite(element) {
                            let path_region = ctx.model.parent_region(next);
                            for region in ctx.model.regions_of(element) {
                                ctx.compiled.regions[region.index()]
                                    .begin_enter
                                    .invoke(ctx, trigger, instance, false)?;
                                if Some(*region) != path_region {
                                    ctx.compiled.regions[region.index()]
                                        .end_enter
                                        .invoke(ctx, trigger, instance, false)?;
                                }
                            }
                        }
                    }
                    step += 1;
                }
                ctx.compiled.vertices[target.index()]
                    .end_enter
                    .invoke(ctx, trigger, instance, false)
            },
        );
        sequence
    }
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

fn lift<M: 'static>(
    action: UserAction<M>,
) -> impl Fn(Ctx<'_, M>, Trigger<'_, M>, &mut dyn Instance, bool) -> Result<()> + 'static {
    move |_, trigger, instance, _| {
        action(trigger, instance);
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn test_compile_is_idempotent() {
        let mut model: Model<()> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let state = model.add_state(model.root(), "state");
        model
            .transition_from(initial)
            .to(state, TransitionKind::External);

        model.initialise();
        assert!(!model.is_dirty());
        model.initialise();
        assert!(!model.is_dirty());
    }

    #[test]
    fn test_mutation_marks_dirty() {
        let mut model: Model<()> = Model::new("machine");
        let state = model.add_state(model.root(), "state");
        model.initialise();
        assert!(!model.is_dirty());
        let _ = model.add_state(model.root(), "another");
        assert!(model.is_dirty());
        model.initialise();
        assert!(!model.is_dirty());
        model.state_mut(state).entry(|_, _| {});
        assert!(model.is_dirty());
    }

    #[test]
    fn test_enter_is_materialised_fresh() {
        let mut element: ElementBehavior<()> = Default::default();
        element.begin_enter.push(|_, _, _, _| Ok(()));
        let first = element.enter();
        element.end_enter.push(|_, _, _, _| Ok(()));
        let second = element.enter();
        assert!(first.has_actions());
        assert!(second.has_actions());
    }
}
