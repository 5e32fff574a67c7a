pub mod engine;
pub mod env;

pub use engine::EngineConfig;
pub use env::EnvConfig;
