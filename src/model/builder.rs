/*!
Fluent construction cursors over a model.

A cursor borrows the model mutably and chains by value, so a state or transition can be shaped
in one expression:

```rust
use statechart::{Model, TransitionKind};

let mut model: Model<&str> = Model::new("machine");
let initial = model.add_initial(model.root(), "initial");
let idle = model.add_state(model.root(), "idle");
let busy = model.add_state(model.root(), "busy");

model.transition_from(initial).to(idle, TransitionKind::External);
model
    .transition_from(idle)
    .to(busy, TransitionKind::External)
    .when(|trigger, _| trigger.message() == Some(&"work"))
    .effect(|_, _| println!("leaving idle"));
```
*/

use crate::behavior::Trigger;
use crate::model::{Guard, Model, TransitionId, TransitionKind, VertexId};
use crate::runtime::Instance;
use std::rc::Rc;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Shapes a state in place: entry and exit behavior.
///
pub struct StateCursor<'a, M> {
    model: &'a mut Model<M>,
    id: VertexId,
}

///
/// Shapes a transition in place: target, kind, guard, and effect.
///
pub struct TransitionCursor<'a, M> {
    model: &'a mut Model<M>,
    id: TransitionId,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl<M: 'static> Model<M> {
    pub fn state_mut(&mut self, state: VertexId) -> StateCursor<'_, M> {
        StateCursor {
            model: self,
            id: state,
        }
    }

    ///
    /// Create a new transition out of `source` and return its cursor. Until `to` is called the
    /// transition has no target and is therefore internal.
    ///
    pub fn transition_from(&mut self, source: VertexId) -> TransitionCursor<'_, M> {
        let id = self.add_transition(source, None, TransitionKind::Internal);
        TransitionCursor { model: self, id }
    }

    pub fn transition_mut(&mut self, transition: TransitionId) -> TransitionCursor<'_, M> {
        TransitionCursor {
            model: self,
            id: transition,
        }
    }
}

// ------------------------------------------------------------------------------------------------

impl<'a, M: 'static> StateCursor<'a, M> {
    #[inline]
    pub fn entry(self, action: impl Fn(Trigger<'_, M>, &mut dyn Instance) + 'static) -> Self {
        self.model.vertices[self.id.index()]
            .entry
            .push(Rc::new(action));
        self.model.dirty = true;
        self
    }

    #[inline]
    pub fn exit(self, action: impl Fn(Trigger<'_, M>, &mut dyn Instance) + 'static) -> Self {
        self.model.vertices[self.id.index()]
            .exit
            .push(Rc::new(action));
        self.model.dirty = true;
        self
    }

    pub fn id(&self) -> VertexId {
        self.id
    }
}

// ------------------------------------------------------------------------------------------------

impl<'a, M: 'static> TransitionCursor<'a, M> {
    ///
    /// Point the transition at `target` with the given kind. Retargeting detaches the previous
    /// incoming cross-reference.
    ///
    pub fn to(self, target: VertexId, kind: TransitionKind) -> Self {
        let id = self.id;
        if let Some(previous) = self.model.transitions[id.index()].target {
            self.model.vertices[previous.index()]
                .incoming
                .retain(|incoming| *incoming != id);
        }
        self.model.transitions[id.index()].target = Some(target);
        self.model.transitions[id.index()].kind = kind;
        self.model.vertices[target.index()].incoming.push(id);
        self.model.dirty = true;
        self
    }

    #[inline]
    pub fn when(
        self,
        guard: impl Fn(Trigger<'_, M>, &dyn Instance) -> bool + 'static,
    ) -> Self {
        self.model.transitions[self.id.index()].guard = Guard::When(Rc::new(guard));
        self.model.dirty = true;
        self
    }

    ///
    /// Make this the else transition of its source, taken when no sibling guard passes. Legal
    /// only out of choice and junction pseudo-states.
    ///
    #[inline]
    pub fn otherwise(self) -> Self {
        self.model.transitions[self.id.index()].guard = Guard::Else;
        self.model.dirty = true;
        self
    }

    #[inline]
    pub fn effect(self, action: impl Fn(Trigger<'_, M>, &mut dyn Instance) + 'static) -> Self {
        self.model.transitions[self.id.index()]
            .effects
            .push(Rc::new(action));
        self.model.dirty = true;
        self
    }

    pub fn id(&self) -> TransitionId {
        self.id
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
