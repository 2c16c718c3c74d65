/*!
Model validation: linear well-formedness checks over a built model.

Validation reports through the logging facade and returns the findings; it never halts
compilation — the runtime copes with most malformed models by doing less than the author hoped,
and the rules below describe the cases where that happens.
*/

use crate::model::{Model, PseudoStateKind, RegionId, TransitionKind, VertexId, VertexKind};

// ------------------------------------------------------------------------------------------------
// Public Types
// ------------------------------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

///
/// A single validation finding, anchored to the qualified name of the offending element.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub element: String,
    pub message: String,
}

// ------------------------------------------------------------------------------------------------
// Public Functions
// ------------------------------------------------------------------------------------------------

///
/// Check the model against the structural rules below, log each finding, and return them all.
///
/// * a region holds at most one `Initial`, one `ShallowHistory`, and one `DeepHistory`
///   pseudo-state; the first discovered is the one the runtime uses,
/// * a region with no initial-family pseudo-state cannot be entered by default,
/// * a final state has no outgoing transitions and no child regions,
/// * an initial pseudo-state has exactly one outgoing transition, and that transition carries
///   the constant-true guard; history kinds have at most one,
/// * a terminate pseudo-state has no outgoing transitions,
/// * else transitions leave only choice or junction pseudo-states, at most one per vertex,
/// * a state carries at most one region named `"default"`,
/// * a local transition targets a proper descendant of its source.
///
pub fn validate<M: 'static>(model: &Model<M>) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    for (index, record) in model.regions.iter().enumerate() {
        if record.removed {
            continue;
        }
        let region = RegionId(index);
        let name = model.region_qualified_name(region);
        for kind in &[
            PseudoStateKind::Initial,
            PseudoStateKind::ShallowHistory,
            PseudoStateKind::DeepHistory,
        ] {
            let count = model
                .vertices_in(region)
                .iter()
                .filter(|vertex| model.vertex_kind(**vertex).pseudo() == Some(*kind))
                .count();
            if count > 1 {
                diagnostics.push(report(
                    Severity::Error,
                    &name,
                    &format!("region contains {} {:?} pseudo-states", count, kind),
                ));
            }
        }
        if model.region_initial(region).is_none() {
            diagnostics.push(report(
                Severity::Warning,
                &name,
                "region has no initial pseudo-state and cannot be entered by default",
            ));
        }
    }

    for (index, record) in model.vertices.iter().enumerate() {
        if record.removed || !record.kind.is_state() {
            continue;
        }
        let defaults = record
            .regions
            .iter()
            .filter(|region| model.region_name(**region) == "default")
            .count();
        if defaults > 1 {
            diagnostics.push(report(
                Severity::Warning,
                &model.qualified_name(VertexId(index)),
                "state carries more than one region named `default`; only the first is implicit",
            ));
        }
    }

    for (index, record) in model.vertices.iter().enumerate() {
        if record.removed {
            continue;
        }
        let vertex = VertexId(index);
        let name = model.qualified_name(vertex);
        match record.kind {
            VertexKind::Final => {
                if !record.outgoing.is_empty() {
                    diagnostics.push(report(
                        Severity::Error,
                        &name,
                        "final state has outgoing transitions",
                    ));
                }
                if !record.regions.is_empty() {
                    diagnostics.push(report(
                        Severity::Error,
                        &name,
                        "final state has child regions",
                    ));
                }
            }
            VertexKind::Pseudo(kind) if kind.is_initial() => {
                if kind == PseudoStateKind::Initial && record.outgoing.len() != 1 {
                    diagnostics.push(report(
                        Severity::Error,
                        &name,
                        &format!(
                            "initial pseudo-state must have exactly one outgoing transition, found {}",
                            record.outgoing.len()
                        ),
                    ));
                }
                if kind.is_history() && record.outgoing.len() > 1 {
                    diagnostics.push(report(
                        Severity::Error,
                        &name,
                        &format!(
                            "history pseudo-state may have at most one outgoing transition, found {}",
                            record.outgoing.len()
                        ),
                    ));
                }
                for transition in &record.outgoing {
                    if !model.transitions[transition.index()].guard.is_trivial() {
                        diagnostics.push(report(
                            Severity::Error,
                            &name,
                            "an initial transition may not carry a guard",
                        ));
                    }
                }
            }
            VertexKind::Pseudo(PseudoStateKind::Terminate) => {
                if !record.outgoing.is_empty() {
                    diagnostics.push(report(
                        Severity::Warning,
                        &name,
                        "transitions out of a terminate pseudo-state are never taken",
                    ));
                }
            }
            _ => {}
        }
        let else_count = record
            .outgoing
            .iter()
            .filter(|transition| model.transitions[transition.index()].guard.is_else())
            .count();
        if else_count > 0 {
            let is_branch = record
                .kind
                .pseudo()
                .map(|kind| kind.is_branch())
                .unwrap_or(false);
            if !is_branch {
                diagnostics.push(report(
                    Severity::Error,
                    &name,
                    "else transitions may only leave choice or junction pseudo-states",
                ));
            }
            if else_count > 1 {
                diagnostics.push(report(
                    Severity::Error,
                    &name,
                    &format!("found {} else transitions, at most one is allowed", else_count),
                ));
            }
        }
    }

    for record in model.transitions.iter() {
        if record.removed {
            continue;
        }
        if record.kind == TransitionKind::Local {
            let descendant = match record.target {
                Some(target) => {
                    target != record.source && model.ancestry(target).contains(&record.source)
                }
                None => false,
            };
            if !descendant {
                diagnostics.push(report(
                    Severity::Error,
                    &model.qualified_name(record.source),
                    "local transition must target a proper descendant of its source",
                ));
            }
        }
    }

    diagnostics
}

// ------------------------------------------------------------------------------------------------
// Private Functions
// ------------------------------------------------------------------------------------------------

fn report(severity: Severity, element: &str, message: &str) -> Diagnostic {
    match severity {
        Severity::Warning => warn!("{}: {}", element, message),
        Severity::Error => error!("{}: {}", element, message),
    }
    Diagnostic {
        severity,
        element: element.to_string(),
        message: message.to_string(),
    }
}

// ------------------------------------------------------------------------------------------------
// Unit Tests
// ------------------------------------------------------------------------------------------------
