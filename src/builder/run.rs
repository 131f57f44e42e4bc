use crate::builder::recipes::{self, HostLibs, Toolchain};
use crate::builder::{report, run_plan, system, Arch, Plan, Timings};
use crate::config::{Component, Config, Servers, GCC_SERVER, GNU_SERVER};
use crate::error::BuildError;
use crate::log;
use crate::mirror::{probe_all, select_mirror, Probe, Protocol};
use crate::source::acquire::{acquire, find_source_dirs, Acquisition};
use crate::store::{self, paths::get_package_dir_path};
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Probes both mirror groups and keeps the defaults where nothing answers.
pub async fn select_servers(config: &Config) -> Servers {
    let mut servers = Servers::defaults();

    info!("testing GNU server mirrors");

    let gnu = select_mirror(&config.gnu_mirrors, 1, Protocol::Ftp, config.probe_timeout).await;
    log::print_mirror("GNU mirror", gnu.as_ref(), GNU_SERVER);

    if let Some(mirror) = gnu {
        servers.gnu = mirror.host;
    }

    info!("testing GCC server mirrors");

    let gcc = select_mirror(&config.gcc_mirrors, 1, Protocol::Ftp, config.probe_timeout).await;
    log::print_mirror("GCC mirror", gcc.as_ref(), GCC_SERVER);

    if let Some(mirror) = gcc {
        servers.gcc = mirror.host;
    }

    servers
}

/// Latency of every configured mirror, fastest first.
pub async fn probe_mirrors(config: &Config) -> Vec<(&'static str, Vec<Probe>)> {
    let port = Protocol::Ftp.port();
    let mut groups = vec![];

    for (group, hosts) in [("GNU", &config.gnu_mirrors), ("GCC", &config.gcc_mirrors)] {
        let mut probes = probe_all(hosts, port, config.probe_timeout).await;

        probes.sort_by_key(|probe| probe.latency.unwrap_or(std::time::Duration::MAX));

        groups.push((group, probes));
    }

    groups
}

/// Mirror selection followed by acquisition of every component.
pub async fn fetch(config: &Config) -> Result<Acquisition> {
    store::check(&config.sandbox).await?;

    let servers = select_servers(config).await;
    let acquisition = acquire(config, &servers).await;

    log::print_acquisition(&acquisition);

    Ok(acquisition)
}

async fn run_plans(plans: &[Plan]) -> Result<(), BuildError> {
    for plan in plans {
        run_plan(plan).await?;
    }

    Ok(())
}

/// Runs one stage, printing its badge and recording its time.
async fn stage<T, F>(name: &str, timings: &mut Timings, work: F) -> Result<T, BuildError>
where
    F: Future<Output = Result<T, BuildError>>,
{
    let started = Instant::now();
    let result = work.await;

    match &result {
        Ok(_) => log::print_stage_success(name, started.elapsed()),
        Err(err) => log::print_stage_error(name, err),
    }

    timings.record_since(name, started);

    result
}

fn source_dir(
    sources: &BTreeMap<Component, PathBuf>,
    component: Component,
) -> Result<&Path, BuildError> {
    sources
        .get(&component)
        .map(PathBuf::as_path)
        .ok_or_else(|| BuildError::MissingSource(component.name().to_string()))
}

/// Builds the cross toolchain from the trees in `sources`.
pub async fn build_toolchain(
    tc: &Toolchain,
    sources: &BTreeMap<Component, PathBuf>,
    timings: &mut Timings,
) -> Result<(), BuildError> {
    stage("Binutils", timings, async {
        run_plans(&recipes::binutils(tc, source_dir(sources, Component::Binutils)?)).await
    })
    .await?;

    stage("Mingw-w64 Headers", timings, async {
        run_plans(&recipes::mingw_headers(tc, source_dir(sources, Component::Mingw64)?)).await?;

        for arch in Arch::ALL {
            recipes::link_headers(&tc.prefix(arch), arch.target()).await?;
        }

        Ok::<_, BuildError>(())
    })
    .await?;

    let gmp = stage("GMP", timings, async {
        run_plan(&recipes::gmp(tc, source_dir(sources, Component::Gmp)?)).await?;
        Ok::<_, BuildError>(tc.library_prefix("gmp"))
    })
    .await?;

    let mpfr = stage("MPFR", timings, async {
        run_plan(&recipes::mpfr(tc, source_dir(sources, Component::Mpfr)?, &gmp)).await?;
        Ok::<_, BuildError>(tc.library_prefix("mpfr"))
    })
    .await?;

    let isl = stage("ISL", timings, async {
        run_plan(&recipes::isl(tc, source_dir(sources, Component::Isl)?, &gmp)).await?;
        Ok::<_, BuildError>(tc.library_prefix("isl"))
    })
    .await?;

    stage("CLooG", timings, async {
        run_plan(&recipes::cloog(tc, source_dir(sources, Component::Cloog)?, &gmp)).await
    })
    .await?;

    let mpc = stage("MPC", timings, async {
        run_plan(&recipes::mpc(tc, source_dir(sources, Component::Mpc)?, &gmp, &mpfr)).await?;
        Ok::<_, BuildError>(tc.library_prefix("mpc"))
    })
    .await?;

    let libs = HostLibs {
        gmp,
        mpfr,
        isl,
        mpc,
    };

    stage("GCC Bootstrap compiler", timings, async {
        run_plans(&recipes::gcc_stage1(tc, source_dir(sources, Component::Gcc)?, &libs)).await
    })
    .await?;

    stage("Mingw-w64 CRT", timings, async {
        run_plans(&recipes::crt(tc, source_dir(sources, Component::Mingw64)?)).await?;

        for arch in Arch::ALL {
            recipes::relocate_crt_libs(&tc.prefix(arch), arch.target()).await?;
        }

        Ok::<_, BuildError>(())
    })
    .await?;

    stage("winpthreads", timings, async {
        run_plans(&recipes::winpthreads(tc, source_dir(sources, Component::Mingw64)?)).await
    })
    .await?;

    stage("GCC", timings, async { run_plans(&recipes::gcc_stage2(tc)).await }).await?;

    Ok(())
}

/// The whole pipeline: sandbox, mirrors, downloads, build, report.
pub async fn build(config: &Config, jobs: usize) -> Result<()> {
    info!("the sandbox is: {}", config.sandbox.display());

    let mut timings = Timings::default();
    let started = Instant::now();

    let acquisition = fetch(config).await?;

    let failed = acquisition.iter().filter(|(_, result)| result.is_err()).count();

    if failed > 0 {
        warn!("{} components failed to download or extract", failed);
    }

    let guess = system::fetch_config_guess(
        &config.config_guess_url,
        &config.sandbox,
        config.http_timeout,
    )
    .await
    .context("failed to download config.guess")?;

    let system = system::guess_system(&guess).await?;

    info!("build system: {}", system);

    let sources = find_source_dirs(&get_package_dir_path(&config.sandbox))
        .context("failed to scan package directory")?;

    info!("source trees: {:?}", sources);

    timings.record_since("Downloading", started);

    let tc = Toolchain {
        sandbox: config.sandbox.clone(),
        system,
        jobs,
        sjlj: config.sjlj,
    };

    if let Err(err) = build_toolchain(&tc, &sources, &mut timings).await {
        bail!("build terminated: {}", err);
    }

    let original_path = env::var("PATH").unwrap_or_default();
    let report = report::generate(&config.sandbox, &original_path, &timings).await?;

    log::print_report(&report.readme);

    Ok(())
}
