use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use skiff_core::build_site;
use tracing::{info, warn};

use crate::config::load_build_config;

pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("source")
                .short('s')
                .long("source")
                .value_name("DIR")
                .help("Source directory of the site [default: .]"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory, relative to the source [default: _site]"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file [default: <source>/skiff.toml]"),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build")).about("Build the site into the output directory")
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    // Load cascading configuration
    let settings = load_build_config(args)?.settings();
    let output = settings.output_path();

    let site = build_site(settings)?;

    if !site.report.failed.is_empty() {
        warn!(failed = ?site.report.failed, "some pages could not be written");
    }
    info!(pages = site.report.written.len(), "Site built successfully in {}", output.display());

    Ok(())
}
