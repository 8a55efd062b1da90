use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "ground-console",
    version,
    about = "Ground control mission console"
)]
pub(crate) struct Args {
    #[arg(long, default_value = "config/ground-console.toml")]
    pub(crate) config: PathBuf,
    #[arg(long, default_value = "127.0.0.1:19410")]
    pub(crate) listen_addr: String,
    #[arg(long, default_value = "logs")]
    pub(crate) log_dir: PathBuf,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    /// Run against an in-process relay and a simulated firing station.
    #[arg(long)]
    pub(crate) dry_run: bool,
}
