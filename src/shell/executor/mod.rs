mod executor;
mod process;

pub use executor::{ExecError, Executor};
