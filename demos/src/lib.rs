pub mod env;
pub mod local;

pub use env::{init_tracing, read_env_any};
pub use local::{LocalFork, start_local_fork};
