//! Command implementations

pub mod decode;
pub mod probe;
pub mod run;
pub mod util;

// Re-export command functions
pub use decode::*;
pub use probe::*;
pub use run::*;
pub use util::*;
