#[macro_use]
extern crate tracing;

mod app;
pub mod args;
mod logging;
mod monitor;
mod stats;

pub use app::App;
pub use args::Args;
pub use logging::{
    init_errors,
    init_logging,
};
pub use stats::SessionStats;
