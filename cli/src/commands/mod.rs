pub mod code;
pub mod ingest;
pub mod layers;
pub mod lookup;
pub mod reconcile;
