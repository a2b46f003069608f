use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cmd {
    pub mod build;
    pub mod serve;
}
mod config;

fn cli() -> Command {
    let root = Command::new("skiff")
        .about("Static site builder with a live-reload dev server")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("serve")
                .long("serve")
                .help("Serve the site after building and rebuild on changes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More logging (-v debug, -vv trace)")
                .action(ArgAction::Count)
                .global(true),
        )
        .subcommand(cmd::build::make_subcommand())
        .subcommand(cmd::serve::make_subcommand());

    cmd::serve::add_serve_args(cmd::build::add_build_args(root))
}

/// Install the fmt subscriber. `RUST_LOG` sets the base filter; each `-v`
/// raises the minimum level on top of it.
fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

fn verbosity(matches: &ArgMatches) -> u8 {
    let nested = matches
        .subcommand()
        .map(|(_, args)| args.get_count("verbose"))
        .unwrap_or(0);
    matches.get_count("verbose").max(nested)
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_tracing(verbosity(&matches));

    match matches.subcommand() {
        Some(("build", args)) => cmd::build::execute(args),
        Some(("serve", args)) => cmd::serve::execute(args).await,
        _ if matches.get_flag("serve") => cmd::serve::execute(&matches).await,
        _ => cmd::build::execute(&matches),
    }
}
