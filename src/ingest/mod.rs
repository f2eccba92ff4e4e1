pub mod dedup;
pub mod identity;
pub mod pipeline;

pub use dedup::DedupLayer;
pub use identity::{transfer_identity, ProbeKind, TransferObservation};
pub use pipeline::{IngestOutcome, IngestPipeline};
