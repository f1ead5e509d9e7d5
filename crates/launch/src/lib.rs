//! Launch planning for the inference subprocess.
//!
//! Composes the engine argument list from three sources: the checkpoint's
//! own `config.json`, the admin-edited tuning blob on the model record,
//! and per-family defaults keyed off the model path. Family values are the
//! base, checkpoint facts refine them, and explicit admin overrides win.

mod families;
mod plan;

pub use families::{family_for_path, FamilyDefaults};
pub use plan::{build_plan, LaunchPlan, PlanInput};
