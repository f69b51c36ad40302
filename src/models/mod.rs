pub mod bucket;
pub mod crash;

pub use bucket::*;
pub use crash::*;
