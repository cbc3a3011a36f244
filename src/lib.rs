pub mod libs;

// Re-export I/O helpers at the crate root
pub use crate::libs::io::{reader, writer};
