//! CLI domain: parse, route and output only.
//! No persistence logic; the route table drives a `ContextManager`.

mod output;
mod parse;
mod route;

pub use output::{map_error, render_objects};
pub use parse::{Cli, Commands, OutputFormat};
pub use route::RunContext;
