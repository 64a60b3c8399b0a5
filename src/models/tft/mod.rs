pub mod feature_embedder;
pub mod glu;
pub mod grn;
pub mod lstm;
pub mod model;
pub mod tfd;
pub mod tfe;
