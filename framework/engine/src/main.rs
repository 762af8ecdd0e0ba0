use clap::Parser;

use siteload_engine::cli::EngineCli;

fn main() -> anyhow::Result<()> {
    // Everything goes to stdout: the supervising process reads one combined,
    // ordered stream and scrapes the side-channel lines out of it.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let cli = EngineCli::parse();
    siteload_engine::run(cli)
}
