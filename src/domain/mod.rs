pub mod record;
pub mod stats;
pub mod tier;

pub use record::*;
pub use stats::*;
pub use tier::*;
