pub mod bus;
pub mod checkpoint;
pub mod ci;
pub mod context;
pub mod engine;
pub mod error;
pub mod feature;
pub mod gates;
pub mod io;
pub mod paths;
pub mod run;
pub mod supervisor;
pub mod types;

pub use error::{CoreError, Result};
