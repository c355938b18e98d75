//! Fakes and fixtures shared by the botpack integration tests.

pub mod fake_docker;
pub mod fake_engine;
pub mod fixture;

pub use fake_docker::{FakeDocker, SIGTERM_EXIT};
pub use fake_engine::{FakeEngine, RecordedBuild};
pub use fixture::BotProject;
