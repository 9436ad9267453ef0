use std::path::PathBuf;

use clap::Parser;
use unpossible_observer::config::DEFAULT_PORT;

#[derive(Parser, Debug)]
#[command(
    name = "unpossible-observer",
    about = "Browser dashboard for watching and steering an Unpossible run",
    version
)]
pub struct Cli {
    /// Port for the dashboard.
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Unpossible installation root. The worker script is taken from its
    /// `lib/` directory.
    #[arg(long, env = "UNPOSSIBLE_HOME")]
    pub home: Option<PathBuf>,

    /// Replay a scripted run instead of starting the worker.
    #[arg(long)]
    pub demo: bool,

    /// Don't open the dashboard in a browser.
    #[arg(long)]
    pub no_open: bool,

    /// Arguments for the worker. When given, a run starts as soon as the
    /// dashboard is listening.
    #[arg(
        value_name = "WORKER_ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub worker_args: Vec<String>,
}
