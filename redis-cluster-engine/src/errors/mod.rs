mod cluster_error;
mod translation;

pub use cluster_error::*;
pub use translation::translate;
