/*
    core_mirror - Denormalized per-participant conversation summaries

    The read model behind conversation list views. Two entries exist per
    conversation (one per participant); last-writer-wins on updated_at
    keeps them convergent under retries and the reconciliation pass.
*/

pub mod errors;
pub mod model;
pub mod store;

pub use errors::{MirrorError, MirrorResult};
pub use model::MirrorEntry;
pub use store::{MirrorStore, SqlMirrorStore, UpsertOutcome};
