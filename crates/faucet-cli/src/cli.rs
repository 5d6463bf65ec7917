use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(about = "Activate faucet wallets and sweep their funds", author = env!("CARGO_PKG_AUTHORS"), version = env!("CARGO_PKG_VERSION"))]
pub struct CLIArgs {
    #[arg(
        short,
        long,
        help = "Use the <directory> as the working directory",
        required = false
    )]
    pub work_dir: Option<PathBuf>,
    #[arg(
        short,
        long,
        help = "Use the <file name> as the location of the config file",
        required = false
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        help = "Read faucet credential files from <directory>",
        required = false
    )]
    pub credentials: Option<PathBuf>,
    #[arg(long, help = "Send swept funds to <address>", required = false)]
    pub to: Option<String>,
    #[arg(
        long,
        help = "Run at most <n> identities at once, 0 for unbounded",
        required = false
    )]
    pub concurrency: Option<usize>,
    #[arg(
        long,
        env = "FAUCET_LOG",
        default_value = "info",
        help = "Log filter used when RUST_LOG is not set"
    )]
    pub log_filter: String,
}
