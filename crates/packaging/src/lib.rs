pub mod cache;
pub mod dockerfile;
pub mod engine;
pub mod pipeline;
pub mod snapshot;
pub mod stages;

pub use cache::*;
pub use engine::*;
pub use pipeline::*;
pub use snapshot::*;
pub use stages::*;
