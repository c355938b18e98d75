pub mod docker;
pub mod environment;
pub mod launcher;
pub mod logs;

pub use docker::*;
pub use environment::*;
pub use launcher::*;
pub use logs::*;
