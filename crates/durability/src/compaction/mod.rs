pub mod compactor;
pub mod lease;

pub use compactor::{CompactionReport, Compactor};
pub use lease::NamespaceLease;
