/*!
A hierarchical, event-driven state machine engine implementing the
[UML State Machine](https://www.omg.org/spec/UML/2.5.1/PDF) execution semantics: composite and
orthogonal states, entry/exit behavior, completion transitions, pseudo-states (initial,
shallow/deep history, choice, junction, terminate) and the three transition flavors (internal,
local, external).

The engine is split into a one-time *compilation* pass and a per-instance *evaluation* step. The
compilation pass walks the model tree and, for every region, vertex, and transition, synthesises
ordered behavior sequences; evaluation descends the active regions of an instance, selects a
unique firing transition by guard, and drives the pre-compiled sequence for it. The model is
immutable while instances run against it; any structural mutation marks it dirty and the next
evaluation re-compiles.

# Example

```rust
use statechart::{evaluate, start, Model, StateInstance, TransitionKind};

let mut model: Model<&str> = Model::new("player");
let initial = model.add_initial(model.root(), "initial");
let stopped = model.add_state(model.root(), "stopped");
let playing = model.add_state(model.root(), "playing");

model.transition_from(initial).to(stopped, TransitionKind::External);
model
    .transition_from(stopped)
    .to(playing, TransitionKind::External)
    .when(|trigger, _| trigger.message() == Some(&"play"));
model
    .transition_from(playing)
    .to(stopped, TransitionKind::External)
    .when(|trigger, _| trigger.message() == Some(&"stop"));

let mut instance = StateInstance::default();
start(&mut model, &mut instance).unwrap();
assert!(evaluate(&mut model, &mut instance, &"play").unwrap());
assert!(statechart::is_active(&model, playing, &instance));
```

# See Also

* [OMG Unified Modeling Language, Version 2.5.1](https://www.omg.org/spec/UML/2.5.1/PDF)
* [UML State Machine (Wikipedia)](https://en.wikipedia.org/wiki/UML_state_machine)
* [State Chart XML (SCXML): State Machine Notation for Control Abstraction](https://www.w3.org/TR/scxml/)

*/

#![warn(
    // ---------- Stylistic
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    // ---------- Public
    // missing_debug_implementations,
    // missing_docs,
    unreachable_pub,
    // ---------- Unsafe
    unsafe_code,
    // ---------- Unused
    unused_extern_crates,
    unused_import_braces,
    unused_qualifications,
)]

#[macro_use]
extern crate error_chain;

#[macro_use]
extern crate lazy_static;

#[macro_use]
extern crate log;

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

pub mod error;

pub mod tag;

mod behavior;
pub use behavior::{GuardFn, Trigger, UserAction};

mod model;
pub use model::*;

mod compile;

mod runtime;
pub use runtime::*;

pub mod format;
