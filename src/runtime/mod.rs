/*!
Per-instance evaluation over a compiled model.

An instance is no more than a mapping from region to its last-known-active state plus a
terminated flag; the model carries everything else. Evaluation is synchronous and single
threaded: the caller serialises calls per instance, and user callbacks must not re-enter the
evaluator on the instance that invoked them. A panic or `Err` raised from a callback aborts the
current evaluation where it stands; the instance may be left partially transitioned and no
rollback is attempted.
*/

use crate::behavior::Trigger;
use crate::compile::Ctx;
use crate::error::{ErrorKind, Result};
use crate::model::{Model, PseudoStateKind, RegionId, TransitionId, VertexId, VertexKind};
use crate::tag::InstanceId;
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// The runtime contract between the evaluator and an instance. The engine depends on nothing
/// beyond this; persistence-backed implementations are expected to live outside the crate.
///
pub trait Instance {
    fn is_terminated(&self) -> bool;

    fn terminate(&mut self);

    ///
    /// Record `state` as the last-known-active vertex of `region`. Never cleared; history entry
    /// depends on stale values surviving region exit.
    ///
    fn set_current(&mut self, region: RegionId, state: VertexId);

    fn current(&self, region: RegionId) -> Option<VertexId>;
}

///
/// The in-memory instance implementation.
///
#[derive(Clone, Debug)]
pub struct StateInstance {
    id: InstanceId,
    current: HashMap<RegionId, VertexId>,
    terminated: bool,
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

///
/// Enter the root state machine: compile if dirty, then run the machine's `on_initialise`
/// sequence, which recursively enters every region on the initial path.
///
pub fn start<M: 'static>(model: &mut Model<M>, instance: &mut dyn Instance) -> Result<()> {
    if model.is_dirty() {
        model.initialise();
    }
    debug!("start `{}`", model.name());
    let ctx = model.ctx()?;
    ctx.compiled
        .on_initialise
        .invoke(ctx, Trigger::Initial, instance, false)
}

///
/// Dispatch one message into the instance. Returns whether any transition fired. A terminated
/// instance consumes nothing and is not inspected further.
///
pub fn evaluate<M: 'static>(
    model: &mut Model<M>,
    instance: &mut dyn Instance,
    message: &M,
) -> Result<bool> {
    if model.is_dirty() {
        model.initialise();
    }
    if instance.is_terminated() {
        return Ok(false);
    }
    let root = model.root();
    let ctx = model.ctx()?;
    evaluate_state(ctx, root, instance, Trigger::Message(message))
}

///
/// A vertex is active when every region on its root path records it (or an ancestor) as
/// current. The root machine is always active.
///
pub fn is_active<M: 'static>(
    model: &Model<M>,
    vertex: VertexId,
    instance: &dyn Instance,
) -> bool {
    match model.parent_region(vertex) {
        None => true,
        Some(region) => {
            is_active(model, model.region_state(region), instance)
                && instance.current(region) == Some(vertex)
        }
    }
}

///
/// A region is complete when its current vertex is a final state.
///
pub fn is_region_complete<M: 'static>(
    model: &Model<M>,
    region: RegionId,
    instance: &dyn Instance,
) -> bool {
    match instance.current(region) {
        Some(current) => model.vertex_kind(current).is_final(),
        None => false,
    }
}

///
/// A state is complete when every one of its regions is; a simple state is trivially complete.
///
pub fn is_complete<M: 'static>(
    model: &Model<M>,
    state: VertexId,
    instance: &dyn Instance,
) -> bool {
    model
        .regions_of(state)
        .iter()
        .all(|region| is_region_complete(model, *region, instance))
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Default for StateInstance {
    fn default() -> Self {
        Self::new(InstanceId::random_with_prefix("instance").unwrap())
    }
}

impl StateInstance {
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            current: HashMap::new(),
            terminated: false,
        }
    }

    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    ///
    /// Every region→state association held, for inspection or persistence.
    ///
    pub fn currents(&self) -> impl Iterator<Item = (RegionId, VertexId)> + '_ {
        self.current.iter().map(|(region, state)| (*region, *state))
    }
}

impl Instance for StateInstance {
    fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn terminate(&mut self) {
        debug!("instance {} terminated", self.id);
        self.terminated = true;
    }

    fn set_current(&mut self, region: RegionId, state: VertexId) {
        let _ = self.current.insert(region, state);
    }

    fn current(&self, region: RegionId) -> Option<VertexId> {
        self.current.get(&region).copied()
    }
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

///
/// Depth-first dispatch: children in declaration order first, then completion, then the state's
/// own outgoing transitions. Exactly one guard may pass; more is an authoring error reported and
/// treated as "nothing fired".
///
pub(crate) fn evaluate_state<M: 'static>(
    ctx: Ctx<'_, M>,
    state: VertexId,
    instance: &mut dyn Instance,
    trigger: Trigger<'_, M>,
) -> Result<bool> {
    let completion_of_self = trigger.is_completion_of(state);
    let mut consumed = false;
    if !completion_of_self {
        for region in ctx.model.regions_of(state) {
            if let Some(current) = instance.current(*region) {
                if evaluate_state(ctx, current, instance, trigger)? {
                    consumed = true;
                    // a transition fired below may have exited this very state
                    if !is_active(ctx.model, state, instance) {
                        break;
                    }
                }
            }
        }
    }
    if consumed {
        if !completion_of_self && is_complete(ctx.model, state, instance) {
            let _ = evaluate_state(ctx, state, instance, Trigger::Completion(state))?;
        }
    } else {
        let passing: Vec<TransitionId> = ctx
            .model
            .outgoing(state)
            .iter()
            .copied()
            .filter(|transition| {
                ctx.model.transitions[transition.index()]
                    .guard
                    .passes(trigger, &*instance)
            })
            .collect();
        match passing.len() {
            0 => {}
            1 => {
                consumed = traverse(ctx, passing[0], instance, trigger)?;
            }
            _ => {
                error!(
                    "multiple outbound transitions evaluated true at `{}` for {:?}",
                    ctx.model.qualified_name(state),
                    trigger
                );
            }
        }
    }
    Ok(consumed)
}

///
/// Fire one transition: junction chains are resolved and concatenated before any behavior runs,
/// choices are resolved after, and a target state that is complete on arrival raises its
/// completion event.
///
pub(crate) fn traverse<M: 'static>(
    ctx: Ctx<'_, M>,
    transition: TransitionId,
    instance: &mut dyn Instance,
    trigger: Trigger<'_, M>,
) -> Result<bool> {
    let mut current = transition;
    let mut sequence = ctx.compiled.traversals[current.index()].clone();
    while let Some(target) = ctx.model.transition_target(current) {
        if ctx.model.vertex_kind(target).pseudo() != Some(PseudoStateKind::Junction) {
            break;
        }
        current = select(ctx, target, &*instance, trigger)?;
        sequence.append(&ctx.compiled.traversals[current.index()]);
    }

    sequence.invoke(ctx, trigger, instance, false)?;

    if let Some(target) = ctx.model.transition_target(current) {
        match ctx.model.vertex_kind(target) {
            VertexKind::Pseudo(PseudoStateKind::Choice) => {
                let chosen = select(ctx, target, &*instance, trigger)?;
                let _ = traverse(ctx, chosen, instance, trigger)?;
            }
            kind if kind.is_state() => {
                if is_complete(ctx.model, target, instance) {
                    let _ = evaluate_state(ctx, target, instance, Trigger::Completion(target))?;
                }
            }
            _ => {}
        }
    }
    Ok(true)
}

///
/// Resolve a branch pseudo-state to the single transition it takes: a choice picks uniformly at
/// random among the passing guards, a junction demands at most one; both fall back to their
/// else transition when nothing passes.
///
pub(crate) fn select<M: 'static>(
    ctx: Ctx<'_, M>,
    pseudo: VertexId,
    instance: &dyn Instance,
    trigger: Trigger<'_, M>,
) -> Result<TransitionId> {
    let passing: Vec<TransitionId> = ctx
        .model
        .outgoing(pseudo)
        .iter()
        .copied()
        .filter(|transition| {
            ctx.model.transitions[transition.index()]
                .guard
                .passes(trigger, instance)
        })
        .collect();
    match ctx.model.vertex_kind(pseudo).pseudo() {
        Some(PseudoStateKind::Choice) => {
            if passing.is_empty() {
                fallback_else(ctx, pseudo)
            } else {
                let pick = (ctx.model.config().random)(passing.len()) % passing.len();
                Ok(passing[pick])
            }
        }
        Some(PseudoStateKind::Junction) => match passing.len() {
            0 => fallback_else(ctx, pseudo),
            1 => Ok(passing[0]),
            _ => {
                let name = ctx.model.qualified_name(pseudo);
                error!(
                    "multiple outbound transition guards evaluated true at `{}` for {:?}",
                    name, trigger
                );
                Err(ErrorKind::MultipleOutboundTransitions(name).into())
            }
        },
        _ => Err(ErrorKind::NotABranch(ctx.model.qualified_name(pseudo)).into()),
    }
}

fn fallback_else<M: 'static>(ctx: Ctx<'_, M>, pseudo: VertexId) -> Result<TransitionId> {
    match ctx.model.else_transition(pseudo) {
        Some(transition) => Ok(transition),
        None => {
            let name = ctx.model.qualified_name(pseudo);
            error!(
                "no outbound transition guard passed and no else transition at `{}`",
                name
            );
            Err(ErrorKind::IllFormedBranch(name).into())
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EngineConfig, TransitionKind};
    use pretty_assertions::assert_eq;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    type Trace = Rc<RefCell<Vec<String>>>;

    // opt in with RUST_LOG=debug to watch element enter/leave hooks
    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn record<M: 'static>(
        trace: &Trace,
        label: &'static str,
    ) -> impl Fn(Trigger<'_, M>, &mut dyn Instance) + 'static {
        let trace = trace.clone();
        move |_, _| trace.borrow_mut().push(label.to_string())
    }

    fn on<M: PartialEq + 'static>(
        message: M,
    ) -> impl Fn(Trigger<'_, M>, &dyn Instance) -> bool + 'static {
        move |trigger, _| trigger.message() == Some(&message)
    }

    #[test]
    fn test_simple_toggle() {
        init_logging();
        let mut model: Model<&str> = Model::new("toggle");
        let initial = model.add_initial(model.root(), "initial");
        let a = model.add_state(model.root(), "a");
        let b = model.add_state(model.root(), "b");
        let _ = model.transition_from(initial).to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("go"));
        let _ = model
            .transition_from(b)
            .to(a, TransitionKind::External)
            .when(on("go"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, a, &instance));

        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, b, &instance));
        assert!(!is_active(&model, a, &instance));

        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, a, &instance));

        // a message no guard matches is not consumed
        assert!(!evaluate(&mut model, &mut instance, &"noop").unwrap());
    }

    #[test]
    fn test_composite_entry_runs_initial() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let outside = model.add_state(model.root(), "outside");
        let composite = model.add_state(model.root(), "composite");
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");
        let _ = model
            .transition_from(initial)
            .to(outside, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(outside)
            .to(composite, TransitionKind::External)
            .when(on("enter"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, outside, &instance));

        assert!(evaluate(&mut model, &mut instance, &"enter").unwrap());
        assert!(is_active(&model, composite, &instance));
        assert!(is_active(&model, a, &instance));
        assert!(!is_active(&model, b, &instance));
    }

    #[test]
    fn test_shallow_history_restores_one_level() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let outside = model.add_state(model.root(), "outside");
        let history = model.add_shallow_history(composite, "history");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");
        let b_initial = model.add_initial(b, "initial");
        let b1 = model.add_state(b, "b1");
        let b2 = model.add_state(b, "b2");

        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model.transition_from(history).to(a, TransitionKind::External);
        let _ = model
            .transition_from(b_initial)
            .to(b1, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("toB"));
        let _ = model
            .transition_from(b1)
            .to(b2, TransitionKind::External)
            .when(on("toB2"));
        let _ = model
            .transition_from(composite)
            .to(outside, TransitionKind::External)
            .when(on("exit"));
        let _ = model
            .transition_from(outside)
            .to(composite, TransitionKind::External)
            .when(on("reenter"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, a, &instance));

        assert!(evaluate(&mut model, &mut instance, &"toB").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"toB2").unwrap());
        assert!(is_active(&model, b2, &instance));

        assert!(evaluate(&mut model, &mut instance, &"exit").unwrap());
        assert!(is_active(&model, outside, &instance));

        // the direct child is restored, its own region re-runs the plain initial
        assert!(evaluate(&mut model, &mut instance, &"reenter").unwrap());
        assert!(is_active(&model, b, &instance));
        assert!(is_active(&model, b1, &instance));
        assert!(!is_active(&model, b2, &instance));
    }

    #[test]
    fn test_deep_history_cascades() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let outer = model.add_state(model.root(), "outer");
        let outside = model.add_state(model.root(), "outside");
        let history = model.add_deep_history(outer, "history");
        let composite = model.add_state(outer, "composite");
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");

        let _ = model
            .transition_from(initial)
            .to(outer, TransitionKind::External);
        let _ = model
            .transition_from(history)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("toB"));
        let _ = model
            .transition_from(outer)
            .to(outside, TransitionKind::External)
            .when(on("exit"));
        let _ = model
            .transition_from(outside)
            .to(outer, TransitionKind::External)
            .when(on("reenter"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, a, &instance));

        assert!(evaluate(&mut model, &mut instance, &"toB").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"exit").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"reenter").unwrap());
        assert!(is_active(&model, composite, &instance));
        assert!(is_active(&model, b, &instance));
    }

    #[test]
    fn test_deep_history_forces_replay_through_shallow_inner() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let outer = model.add_state(model.root(), "outer");
        let outside = model.add_state(model.root(), "outside");
        let history = model.add_deep_history(outer, "history");
        let composite = model.add_state(outer, "composite");
        let inner_history = model.add_shallow_history(composite, "history");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");

        let _ = model
            .transition_from(initial)
            .to(outer, TransitionKind::External);
        let _ = model
            .transition_from(history)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_history)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("toB"));
        let _ = model
            .transition_from(outer)
            .to(outside, TransitionKind::External)
            .when(on("exit"));
        let _ = model
            .transition_from(outside)
            .to(outer, TransitionKind::External)
            .when(on("reenter"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"toB").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"exit").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"reenter").unwrap());
        assert!(is_active(&model, b, &instance));
    }

    #[test]
    fn test_orthogonal_regions_dispatch_independently() {
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let ortho = model.add_state(model.root(), "ortho");
        let first = model.add_region(ortho, "first");
        let second = model.add_region(ortho, "second");
        let x_initial = model.add_initial(first, "initial");
        let x = model.add_state(first, "x");
        let y = model.add_state(first, "y");
        let p_initial = model.add_initial(second, "initial");
        let p = model.add_state(second, "p");
        let q = model.add_state(second, "q");
        let _ = model.state_mut(x).entry(record(&trace, "enter-x"));
        let _ = model.state_mut(p).entry(record(&trace, "enter-p"));

        let _ = model
            .transition_from(initial)
            .to(ortho, TransitionKind::External);
        let _ = model.transition_from(x_initial).to(x, TransitionKind::External);
        let _ = model.transition_from(p_initial).to(p, TransitionKind::External);
        let _ = model
            .transition_from(x)
            .to(y, TransitionKind::External)
            .when(on("m1"));
        let _ = model
            .transition_from(q)
            .to(p, TransitionKind::External)
            .when(on("m2"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, x, &instance));
        assert!(is_active(&model, p, &instance));
        // regions enter in declaration order
        assert_eq!(*trace.borrow(), vec!["enter-x", "enter-p"]);

        assert!(evaluate(&mut model, &mut instance, &"m1").unwrap());
        assert!(is_active(&model, y, &instance));
        assert!(is_active(&model, p, &instance));
        assert!(!is_active(&model, x, &instance));
        assert!(!is_active(&model, q, &instance));
    }

    #[test]
    fn test_orthogonal_entry_order_is_stable() {
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let ortho = model.add_state(model.root(), "ortho");
        let outside = model.add_state(model.root(), "outside");
        let first = model.add_region(ortho, "first");
        let second = model.add_region(ortho, "second");
        let x_initial = model.add_initial(first, "initial");
        let x = model.add_state(first, "x");
        let p_initial = model.add_initial(second, "initial");
        let p = model.add_state(second, "p");
        let _ = model.state_mut(x).entry(record(&trace, "x"));
        let _ = model.state_mut(p).entry(record(&trace, "p"));

        let _ = model
            .transition_from(initial)
            .to(ortho, TransitionKind::External);
        let _ = model.transition_from(x_initial).to(x, TransitionKind::External);
        let _ = model.transition_from(p_initial).to(p, TransitionKind::External);
        let _ = model
            .transition_from(ortho)
            .to(outside, TransitionKind::External)
            .when(on("exit"));
        let _ = model
            .transition_from(outside)
            .to(ortho, TransitionKind::External)
            .when(on("reenter"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"exit").unwrap());
        assert!(evaluate(&mut model, &mut instance, &"reenter").unwrap());
        assert_eq!(*trace.borrow(), vec!["x", "p", "x", "p"]);
    }

    #[test]
    fn test_entry_to_nested_vertex_enters_siblings_fully() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let outside = model.add_state(model.root(), "outside");
        let ortho = model.add_state(model.root(), "ortho");
        let first = model.add_region(ortho, "first");
        let second = model.add_region(ortho, "second");
        let x_initial = model.add_initial(first, "initial");
        let x = model.add_state(first, "x");
        let y = model.add_state(first, "y");
        let p_initial = model.add_initial(second, "initial");
        let p = model.add_state(second, "p");

        let _ = model
            .transition_from(initial)
            .to(outside, TransitionKind::External);
        let _ = model.transition_from(x_initial).to(x, TransitionKind::External);
        let _ = model.transition_from(p_initial).to(p, TransitionKind::External);
        let _ = model
            .transition_from(outside)
            .to(y, TransitionKind::External)
            .when(on("dive"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"dive").unwrap());
        // the region on the path skips its initial, the sibling runs its own
        assert!(is_active(&model, y, &instance));
        assert!(is_active(&model, p, &instance));
        assert!(!is_active(&model, x, &instance));
    }

    #[test]
    fn test_junction_chain_composes_statically() {
        let trace: Trace = Default::default();
        let take_first = Rc::new(Cell::new(true));
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let source = model.add_state(model.root(), "source");
        let junction = model.add_junction(model.root(), "junction");
        let t1 = model.add_state(model.root(), "t1");
        let t2 = model.add_state(model.root(), "t2");

        let _ = model
            .transition_from(initial)
            .to(source, TransitionKind::External);
        let _ = model
            .transition_from(source)
            .to(junction, TransitionKind::External)
            .when(on("go"))
            .effect(record(&trace, "source->junction"));
        {
            let take_first = take_first.clone();
            let _ = model
                .transition_from(junction)
                .to(t1, TransitionKind::External)
                .when(move |_, _| take_first.get())
                .effect(record(&trace, "junction->t1"));
        }
        {
            let take_first = take_first.clone();
            let _ = model
                .transition_from(junction)
                .to(t2, TransitionKind::External)
                .when(move |_, _| !take_first.get())
                .effect(record(&trace, "junction->t2"));
        }

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, t1, &instance));
        assert_eq!(*trace.borrow(), vec!["source->junction", "junction->t1"]);

        let mut other = StateInstance::default();
        take_first.set(false);
        trace.borrow_mut().clear();
        start(&mut model, &mut other).unwrap();
        assert!(evaluate(&mut model, &mut other, &"go").unwrap());
        assert!(is_active(&model, t2, &other));
        assert_eq!(*trace.borrow(), vec!["source->junction", "junction->t2"]);
    }

    #[test]
    fn test_junction_ambiguity_is_an_error_without_mutation() {
        init_logging();
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let source = model.add_state(model.root(), "source");
        let junction = model.add_junction(model.root(), "junction");
        let t1 = model.add_state(model.root(), "t1");
        let t2 = model.add_state(model.root(), "t2");

        let _ = model
            .transition_from(initial)
            .to(source, TransitionKind::External);
        let _ = model
            .transition_from(source)
            .to(junction, TransitionKind::External)
            .when(on("go"))
            .effect(record(&trace, "effect"));
        let _ = model
            .transition_from(junction)
            .to(t1, TransitionKind::External)
            .when(|_, _| true);
        let _ = model
            .transition_from(junction)
            .to(t2, TransitionKind::External)
            .when(|_, _| true);

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        let result = evaluate(&mut model, &mut instance, &"go");
        assert!(result.is_err());
        match result.err().unwrap().0 {
            ErrorKind::MultipleOutboundTransitions(_) => {}
            _ => panic!("expecting ErrorKind::MultipleOutboundTransitions"),
        }
        // junctions resolve before any behavior runs, so nothing moved
        assert!(is_active(&model, source, &instance));
        assert!(trace.borrow().is_empty());
    }

    #[test]
    fn test_choice_uses_injected_rng() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let source = model.add_state(model.root(), "source");
        let choice = model.add_choice(model.root(), "choice");
        let t1 = model.add_state(model.root(), "t1");
        let t2 = model.add_state(model.root(), "t2");

        let _ = model
            .transition_from(initial)
            .to(source, TransitionKind::External);
        let _ = model
            .transition_from(source)
            .to(choice, TransitionKind::External)
            .when(on("go"));
        let _ = model.transition_from(choice).to(t1, TransitionKind::External);
        let _ = model.transition_from(choice).to(t2, TransitionKind::External);

        let mut config = EngineConfig::default();
        config.random = Rc::new(|_| 1);
        model.set_config(config);

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, t2, &instance));
    }

    #[test]
    fn test_choice_falls_back_to_else() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let source = model.add_state(model.root(), "source");
        let choice = model.add_choice(model.root(), "choice");
        let t1 = model.add_state(model.root(), "t1");
        let t2 = model.add_state(model.root(), "t2");

        let _ = model
            .transition_from(initial)
            .to(source, TransitionKind::External);
        let _ = model
            .transition_from(source)
            .to(choice, TransitionKind::External)
            .when(on("go"));
        let _ = model
            .transition_from(choice)
            .to(t1, TransitionKind::External)
            .when(|_, _| false);
        let _ = model
            .transition_from(choice)
            .to(t2, TransitionKind::External)
            .otherwise();

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, t2, &instance));
    }

    #[test]
    fn test_branch_without_viable_transition_is_ill_formed() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let source = model.add_state(model.root(), "source");
        let choice = model.add_choice(model.root(), "choice");
        let t1 = model.add_state(model.root(), "t1");

        let _ = model
            .transition_from(initial)
            .to(source, TransitionKind::External);
        let _ = model
            .transition_from(source)
            .to(choice, TransitionKind::External)
            .when(on("go"));
        let _ = model
            .transition_from(choice)
            .to(t1, TransitionKind::External)
            .when(|_, _| false);

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        let result = evaluate(&mut model, &mut instance, &"go");
        assert!(result.is_err());
        match result.err().unwrap().0 {
            ErrorKind::IllFormedBranch(_) => {}
            _ => panic!("expecting ErrorKind::IllFormedBranch"),
        }
    }

    #[test]
    fn test_terminate_halts_the_instance() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let a = model.add_state(model.root(), "a");
        let terminate = model.add_terminate(model.root(), "terminate");
        let _ = model.transition_from(initial).to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(terminate, TransitionKind::External)
            .when(on("kill"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(!instance.is_terminated());

        assert!(evaluate(&mut model, &mut instance, &"kill").unwrap());
        assert!(instance.is_terminated());

        // a terminated instance consumes nothing, without inspection
        assert!(!evaluate(&mut model, &mut instance, &"kill").unwrap());
    }

    #[test]
    fn test_completion_fires_on_enclosing_state() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let done = model.add_state(model.root(), "done");
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let finished = model.add_final_state(composite, "finished");

        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(finished, TransitionKind::External)
            .when(on("finish"));
        let _ = model
            .transition_from(composite)
            .to(done, TransitionKind::External);

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, a, &instance));

        assert!(evaluate(&mut model, &mut instance, &"finish").unwrap());
        assert!(is_active(&model, done, &instance));
        assert!(!is_active(&model, composite, &instance));
    }

    #[test]
    fn test_complete_state_without_outgoing_converges() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let inner_initial = model.add_initial(composite, "initial");
        let finished = model.add_final_state(composite, "finished");

        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(finished, TransitionKind::External);

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(is_active(&model, finished, &instance));
        assert!(is_complete(&model, composite, &instance));
        let region = model.parent_region(finished).unwrap();
        assert!(is_region_complete(&model, region, &instance));
    }

    #[test]
    fn test_internal_transition_stays_inside() {
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let a = model.add_state(model.root(), "a");
        let _ = model
            .state_mut(a)
            .entry(record(&trace, "enter-a"))
            .exit(record(&trace, "exit-a"));
        let _ = model.transition_from(initial).to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .when(on("ping"))
            .effect(record(&trace, "ping"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert_eq!(*trace.borrow(), vec!["enter-a"]);

        assert!(evaluate(&mut model, &mut instance, &"ping").unwrap());
        assert!(is_active(&model, a, &instance));
        assert_eq!(*trace.borrow(), vec!["enter-a", "ping"]);
    }

    #[test]
    fn test_internal_transition_completion_flag() {
        fn build(flagged: bool) -> (Model<&'static str>, VertexId, VertexId) {
            let ready = Rc::new(Cell::new(false));
            let mut model: Model<&str> = Model::new("machine");
            let initial = model.add_initial(model.root(), "initial");
            let composite = model.add_state(model.root(), "composite");
            let done = model.add_state(model.root(), "done");
            let inner_initial = model.add_initial(composite, "initial");
            let finished = model.add_final_state(composite, "finished");

            let _ = model
                .transition_from(initial)
                .to(composite, TransitionKind::External);
            let _ = model
                .transition_from(inner_initial)
                .to(finished, TransitionKind::External);
            {
                let ready = ready.clone();
                let _ = model
                    .transition_from(composite)
                    .when(on("ping"))
                    .effect(move |_, _| ready.set(true));
            }
            {
                let ready = ready.clone();
                let _ = model
                    .transition_from(composite)
                    .to(done, TransitionKind::External)
                    .when(move |_, _| ready.get());
            }

            let mut config = EngineConfig::default();
            config.internal_transitions_trigger_completion = flagged;
            model.set_config(config);
            (model, composite, done)
        }

        let (mut model, _, done) = build(true);
        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"ping").unwrap());
        assert!(is_active(&model, done, &instance));

        let (mut model, composite, _) = build(false);
        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"ping").unwrap());
        assert!(is_active(&model, composite, &instance));
    }

    #[test]
    fn test_ambiguous_state_dispatch_fires_nothing() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let a = model.add_state(model.root(), "a");
        let b = model.add_state(model.root(), "b");
        let c = model.add_state(model.root(), "c");
        let _ = model.transition_from(initial).to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("go"));
        let _ = model
            .transition_from(a)
            .to(c, TransitionKind::External)
            .when(on("go"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(!evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, a, &instance));
    }

    #[test]
    fn test_local_transition_stays_within_the_composite() {
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let _ = model.state_mut(composite).exit(record(&trace, "exit-composite"));
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");
        let _ = model.state_mut(a).exit(record(&trace, "exit-a"));

        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(composite)
            .to(b, TransitionKind::Local)
            .when(on("go"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, b, &instance));
        assert!(is_active(&model, composite, &instance));
        assert_eq!(*trace.borrow(), vec!["exit-a"]);
    }

    #[test]
    fn test_external_transition_to_descendant_exits_the_composite() {
        let trace: Trace = Default::default();
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let _ = model.state_mut(composite).exit(record(&trace, "exit-composite"));
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");
        let _ = model.state_mut(a).exit(record(&trace, "exit-a"));

        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(composite)
            .to(b, TransitionKind::External)
            .when(on("go"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());
        assert!(is_active(&model, b, &instance));
        // child exits first, then the composite itself
        assert_eq!(*trace.borrow(), vec!["exit-a", "exit-composite"]);
    }

    #[test]
    fn test_fresh_instance_matches_clean_start() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let a = model.add_state(model.root(), "a");
        let b = model.add_state(model.root(), "b");
        let _ = model.transition_from(initial).to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("go"));

        let mut worked = StateInstance::default();
        start(&mut model, &mut worked).unwrap();
        assert!(evaluate(&mut model, &mut worked, &"go").unwrap());

        let mut fresh = StateInstance::default();
        start(&mut model, &mut fresh).unwrap();
        let mut clean = StateInstance::default();
        start(&mut model, &mut clean).unwrap();

        let fresh: std::collections::HashMap<_, _> = fresh.currents().collect();
        let clean: std::collections::HashMap<_, _> = clean.currents().collect();
        assert_eq!(fresh, clean);
        assert!(fresh.values().any(|state| *state == a));
    }

    #[test]
    fn test_active_path_invariant_after_traversal() {
        let mut model: Model<&str> = Model::new("machine");
        let initial = model.add_initial(model.root(), "initial");
        let composite = model.add_state(model.root(), "composite");
        let inner_initial = model.add_initial(composite, "initial");
        let a = model.add_state(composite, "a");
        let b = model.add_state(composite, "b");
        let _ = model
            .transition_from(initial)
            .to(composite, TransitionKind::External);
        let _ = model
            .transition_from(inner_initial)
            .to(a, TransitionKind::External);
        let _ = model
            .transition_from(a)
            .to(b, TransitionKind::External)
            .when(on("go"));

        let mut instance = StateInstance::default();
        start(&mut model, &mut instance).unwrap();
        assert!(evaluate(&mut model, &mut instance, &"go").unwrap());

        let mut vertex = b;
        while let Some(region) = model.parent_region(vertex) {
            assert_eq!(instance.current(region), Some(vertex));
            assert!(is_active(&model, vertex, &instance));
            vertex = model.region_state(region);
        }
    }
}
