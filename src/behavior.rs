/*!
Triggers, user callback types, and the compiled behavior sequence.

A `Behavior` is an ordered list of actions composed by concatenation; it is built once by the
compilation pass and invoked many times at runtime. Every action receives the compiled context,
the trigger being dispatched, the instance, and the history flag threaded through entry cascades.
*/

use crate::compile::Ctx;
use crate::error::Result;
use crate::model::VertexId;
use crate::runtime::Instance;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// The stimulus a dispatch carries. Completion events are an explicit variant rather than a
/// sentinel message so that user messages can never be mistaken for them.
///
pub enum Trigger<'a, M> {
    /// Machine initialisation; there is no message.
    Initial,
    /// An external message posted by the caller.
    Message(&'a M),
    /// The completion event of the named state.
    Completion(VertexId),
}

///
/// A user-supplied entry, exit, or transition effect callback.
///
pub type UserAction<M> = Rc<dyn Fn(Trigger<'_, M>, &mut dyn Instance)>;

///
/// A user-supplied transition guard predicate.
///
pub type GuardFn<M> = Rc<dyn Fn(Trigger<'_, M>, &dyn Instance) -> bool>;

pub(crate) type ActionFn<M> =
    dyn Fn(Ctx<'_, M>, Trigger<'_, M>, &mut dyn Instance, bool) -> Result<()>;

///
/// An ordered sequence of actions. Concatenation copies, so later changes to the source sequence
/// never show through a sequence it was pushed into.
///
pub(crate) struct Behavior<M> {
    actions: Vec<Rc<ActionFn<M>>>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl<'a, M> Clone for Trigger<'a, M> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, M> Copy for Trigger<'a, M> {}

impl<'a, M> Debug for Trigger<'a, M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Trigger::Initial => write!(f, "Initial"),
            Trigger::Message(_) => write!(f, "Message(..)"),
            Trigger::Completion(state) => write!(f, "Completion({:?})", state),
        }
    }
}

impl<'a, M> Trigger<'a, M> {
    ///
    /// The message carried by this trigger, if it is one.
    ///
    pub fn message(&self) -> Option<&'a M> {
        match self {
            Trigger::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn is_completion_of(&self, state: VertexId) -> bool {
        match self {
            Trigger::Completion(completed) => *completed == state,
            _ => false,
        }
    }
}

// ------------------------------------------------------------------------------------------------

impl<M> Default for Behavior<M> {
    fn default() -> Self {
        Self {
            actions: Vec::new(),
        }
    }
}

impl<M> Clone for Behavior<M> {
    fn clone(&self) -> Self {
        Self {
            actions: self.actions.clone(),
        }
    }
}

impl<M> Debug for Behavior<M> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Behavior")
            .field("actions", &format!("[..{}]", self.actions.len()))
            .finish()
    }
}

impl<M> Behavior<M> {
    pub(crate) fn push(
        &mut self,
        action: impl Fn(Ctx<'_, M>, Trigger<'_, M>, &mut dyn Instance, bool) -> Result<()> + 'static,
    ) {
        self.actions.push(Rc::new(action));
    }

    pub(crate) fn append(&mut self, other: &Behavior<M>) {
        self.actions.extend(other.actions.iter().cloned());
    }

    pub(crate) fn has_actions(&self) -> bool {
        !self.actions.is_empty()
    }

    ///
    /// Run every action in order. The first `Err` aborts the sequence and propagates to the
    /// caller; no rollback is attempted.
    ///
    pub(crate) fn invoke(
        &self,
        ctx: Ctx<'_, M>,
        trigger: Trigger<'_, M>,
        instance: &mut dyn Instance,
        history: bool,
    ) -> Result<()> {
        for action in &self.actions {
            action(ctx, trigger, instance, history)?;
        }
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
