pub mod assembler;
pub mod config;
pub mod core;
pub mod error;
pub mod factors;
pub mod gps;
pub mod io;
pub mod linalg;
pub mod logger;
pub mod manifold;
pub mod optimizer;
pub mod scheduler;
pub mod sensor;

pub use error::{SclamError, SclamResult};
pub use logger::{init_logger, init_logger_with_level};
