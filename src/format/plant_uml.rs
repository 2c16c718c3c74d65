/*!
Emits a [PlantUML](https://plantuml.com/state-diagram) state diagram for a model.

Composite states render as nested `state` blocks, orthogonal regions are separated by `--`,
initial-family pseudo-states and final states render as `[*]` endpoints, and branch
pseudo-states carry the `<<choice>>` stereotype.
*/

use crate::format::Stringify;
use crate::model::{Model, PseudoStateKind, RegionId, VertexId, VertexKind};
use std::marker::PhantomData;

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

pub struct WritePlantUml {
    ph: PhantomData<u8>,
}

// ------------------------------------------------------------------------------------------------
// Implementations
// ------------------------------------------------------------------------------------------------

impl Default for WritePlantUml {
    fn default() -> Self {
        Self { ph: PhantomData }
    }
}

impl<M: 'static> Stringify<M> for WritePlantUml {
    type Error = ();

    fn stringify(&self, model: &Model<M>) -> Result<String, Self::Error> {
        let mut writer = Writer {
            model,
            buffer: String::new(),
        };
        writer.push_line(0, "@startuml");
        writer.push_line(0, &format!("title {}", model.name()));
        let regions = model.regions_of(model.root());
        for (index, region) in regions.iter().enumerate() {
            writer.write_region(*region, 0, index == regions.len() - 1);
        }
        writer.push_line(0, "@enduml");
        Ok(writer.buffer)
    }
}

// ------------------------------------------------------------------------------------------------
// Private Types
// ------------------------------------------------------------------------------------------------

struct Writer<'m, M> {
    model: &'m Model<M>,
    buffer: String,
}

impl<'m, M: 'static> Writer<'m, M> {
    fn push_line(&mut self, indent: usize, line: &str) {
        for _ in 0..indent {
            self.buffer.push_str("  ");
        }
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    fn write_region(&mut self, region: RegionId, indent: usize, last: bool) {
        for vertex in self.model.vertices_in(region) {
            self.write_vertex(*vertex, indent);
        }
        for vertex in self.model.vertices_in(region) {
            for transition in self.model.outgoing(*vertex) {
                if let Some(target) = self.model.transition_target(*transition) {
                    let line = format!(
                        "{} --> {}",
                        self.endpoint(*vertex),
                        self.endpoint(target)
                    );
                    self.push_line(indent, &line);
                }
            }
        }
        if !last {
            self.push_line(indent, "--");
        }
    }

    fn write_vertex(&mut self, vertex: VertexId, indent: usize) {
        match self.model.vertex_kind(vertex) {
            VertexKind::State | VertexKind::Machine => {
                if self.model.is_composite(vertex) {
                    self.push_line(
                        indent,
                        &format!("state {} {{", self.model.vertex_name(vertex)),
                    );
                    let regions = self.model.regions_of(vertex);
                    for (index, region) in regions.iter().enumerate() {
                        self.write_region(*region, indent + 1, index == regions.len() - 1);
                    }
                    self.push_line(indent, "}");
                } else {
                    self.push_line(indent, &format!("state {}", self.model.vertex_name(vertex)));
                }
            }
            VertexKind::Final => {}
            VertexKind::Pseudo(kind) => match kind {
                PseudoStateKind::Choice | PseudoStateKind::Junction => {
                    self.push_line(
                        indent,
                        &format!("state {} <<choice>>", self.model.vertex_name(vertex)),
                    );
                }
                _ => {}
            },
        }
    }

    ///
    /// Initial-family pseudo-states and final states are the `[*]` endpoints of their region.
    ///
    fn endpoint(&self, vertex: VertexId) -> String {
        match self.model.vertex_kind(vertex) {
            VertexKind::Final => "[*]".to_string(),
            VertexKind::Pseudo(kind) if kind.is_initial() => "[*]".to_string(),
            _ => self.model.vertex_name(vertex).to_string(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
