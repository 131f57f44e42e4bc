use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use mwtc::builder::{run, system};
use mwtc::config::{self, Component, Settings};
use mwtc::log;
use std::path::PathBuf;
use tracing::{subscriber, Level};
use tracing_subscriber::{fmt::writer::MakeWriterExt, FmtSubscriber};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[clap(long, global = true, default_value_t = Level::INFO)]
    level: Level,

    /// Settings file, defaults to `<prefix>/mwtc.toml` when present
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Sandbox directory
    #[clap(long, short, global = true)]
    prefix: Option<String>,

    /// Preferred GCC version
    #[clap(long, short, global = true)]
    gcc: Option<String>,

    /// Preferred binutils version
    #[clap(long, short, global = true)]
    binutils: Option<String>,

    /// Preferred mingw-w64 version
    #[clap(long, short, global = true)]
    mingw: Option<String>,

    /// Build the i686 compiler with SJLJ exceptions
    #[clap(long, global = true)]
    sjlj: bool,

    /// Parallel downloads
    #[clap(long, global = true)]
    jobs: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download every component and build both toolchains
    Build,

    /// Select mirrors and download every component
    Fetch,

    /// Print the latency of every mirror
    Mirrors,
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings {
            sandbox: self.prefix.clone(),
            download_workers: self.jobs,
            sjlj: self.sjlj.then_some(true),
            ..Default::default()
        };

        for (component, version) in [
            (Component::Gcc, &self.gcc),
            (Component::Binutils, &self.binutils),
            (Component::Mingw64, &self.mingw),
        ] {
            if let Some(version) = version {
                settings
                    .versions
                    .insert(component.name().to_string(), version.clone());
            }
        }

        settings
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber_writer = std::io::stderr.with_max_level(cli.level);

    let mut subscriber = FmtSubscriber::builder()
        .with_max_level(cli.level)
        .with_target(false)
        .with_writer(subscriber_writer)
        .without_time();

    if [Level::DEBUG, Level::TRACE].contains(&cli.level) {
        subscriber = subscriber.with_file(true).with_line_number(true);
    }

    subscriber::set_global_default(subscriber.finish())?;

    let config = config::load(cli.config.as_deref(), &cli.settings())?;

    match cli.command {
        Command::Build => run::build(&config, system::available_jobs()).await,

        Command::Fetch => {
            let acquisition = run::fetch(&config).await?;

            let failed: Vec<&str> = acquisition
                .iter()
                .filter(|(_, result)| result.is_err())
                .map(|(component, _)| component.name())
                .collect();

            if !failed.is_empty() {
                bail!("failed to acquire: {}", failed.join(", "));
            }

            Ok(())
        }

        Command::Mirrors => {
            for (group, probes) in run::probe_mirrors(&config).await {
                log::print_probes(group, &probes);
            }

            Ok(())
        }
    }
}
