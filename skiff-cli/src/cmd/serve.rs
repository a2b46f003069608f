use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use notify_debouncer_mini::{DebounceEventResult, new_debouncer};
use skiff_core::{BuildError, Settings, Site, SiteBuilder};
use skiff_dev_server::{LiveServer, LiveServerConfig, livereload_script};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, info};

use crate::cmd::build::add_build_args;
use crate::config::load_serve_config;

pub fn add_serve_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .value_parser(clap::value_parser!(u16))
                .help("Port to serve on [default: 3000]"),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to [default: 127.0.0.1]"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(clap::ArgAction::SetTrue),
        )
}

pub fn make_subcommand() -> Command {
    add_serve_args(add_build_args(Command::new("serve")))
        .about("Build the site, serve it and rebuild with live reload on changes")
}

fn build(settings: Settings) -> Result<Site, BuildError> {
    SiteBuilder::new(settings)
        .live_reload(livereload_script())
        .build()
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    // Load cascading configuration
    let config = load_serve_config(args)?;
    let settings = config.settings();
    let output_dir = settings.output_path();

    build(settings.clone())?;

    // Start the live dev server (handles its own file watching of output dir)
    let server_config = LiveServerConfig {
        host: config.build.host.clone(),
        port: config.build.port,
        root: output_dir,
        open: config.build.open,
        live_reload: true,
        ignore: Vec::new(),
    };

    let server = LiveServer::new(server_config);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "dev server stopped");
        }
    });

    // Watch source files and rebuild on changes
    let watcher_args = args.clone();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watch_source_files(settings, watcher_args).await {
            error!(error = %e, "source watcher stopped");
        }
    });

    // Wait for both tasks
    let _ = tokio::try_join!(server_handle, watcher_handle)?;

    Ok(())
}

async fn watch_source_files(initial: Settings, args: ArgMatches) -> Result<()> {
    let source_dir = canonical(&initial.source_root);
    let output_dir = canonical(&initial.output_path());
    let ignore = initial.ignore.clone();

    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let mut debouncer = new_debouncer(
        Duration::from_millis(500), // Slightly longer delay for rebuilds
        move |res: DebounceEventResult| {
            if let Ok(events) = res {
                let paths: Vec<PathBuf> = events.into_iter().map(|event| event.path).collect();
                let _ = tx.blocking_send(paths);
            }
        },
    )?;

    debouncer
        .watcher()
        .watch(&source_dir, notify::RecursiveMode::Recursive)?;
    info!(source = %source_dir.display(), "watching source for changes");

    while let Some(paths) = rx.recv().await {
        let changed: Vec<&PathBuf> = paths
            .iter()
            .filter(|path| is_source_change(path, &source_dir, &output_dir, &ignore))
            .collect();
        if changed.is_empty() {
            continue;
        }
        debug!(changed = ?changed, "source changed");

        // Reload configuration so edits to skiff.toml apply too. The output
        // directory is not cleaned on rebuilds; the dev server watches it.
        let mut settings = match load_serve_config(&args) {
            Ok(config) => config.settings(),
            Err(e) => {
                error!(error = %e, "invalid configuration, keeping the previous one");
                initial.clone()
            }
        };
        settings.clean = false;

        // Rebuild site - the dev server will detect output changes and reload
        match tokio::task::spawn_blocking(move || build(settings)).await? {
            Ok(site) => info!(pages = site.report.written.len(), "Site rebuilt successfully"),
            Err(e) => error!(error = %e, "rebuild failed"),
        }
    }

    Ok(())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Whether a changed path should trigger a rebuild: inside the source
/// directory, outside the output directory, and not ignored or hidden.
fn is_source_change(path: &Path, source_dir: &Path, output_dir: &Path, ignore: &[String]) -> bool {
    let path = canonical(path);
    if path.starts_with(output_dir) {
        return false;
    }
    let Ok(relative) = path.strip_prefix(source_dir) else {
        return false;
    };
    !relative.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with('.') || ignore.iter().any(|i| *i == name)
    })
}
