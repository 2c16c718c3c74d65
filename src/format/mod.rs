/*!
Provides support for emitting external representations of a model.

Each sub-module provides a different representation type; all are read-only walks over the
arena and have no effect on, or dependency upon, compilation.

# Example

```rust
use statechart::format::plant_uml::WritePlantUml;
use statechart::format::Stringify;
use statechart::{Model, TransitionKind};

let mut model: Model<()> = Model::new("simple");
let initial = model.add_initial(model.root(), "initial");
let state = model.add_state(model.root(), "state");
let done = model.add_final_state(model.root(), "done");
model.transition_from(initial).to(state, TransitionKind::External);
model.transition_from(state).to(done, TransitionKind::External);

let writer = WritePlantUml::default();
let string = writer.stringify(&model);
assert!(string.is_ok());
```
*/

use crate::model::Model;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

///
/// Create a textual representation of the model.
///
pub trait Stringify<M> {
    type Error;

    fn stringify(&self, model: &Model<M>) -> Result<String, Self::Error>;
}

// ------------------------------------------------------------------------------------------------
// Modules
// ------------------------------------------------------------------------------------------------

pub mod plant_uml;
