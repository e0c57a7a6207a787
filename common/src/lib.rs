pub mod cli;
pub mod host;
pub mod logging;
pub mod util;

pub use host::{HostFeature, HostFeatures};
