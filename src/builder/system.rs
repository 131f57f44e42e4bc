use crate::error::{BuildError, FetchError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{fs, process::Command};
use tracing::{debug, info};
use url::Url;

pub const CONFIG_GUESS: &str = "config.guess";

/// Downloads config.guess into `sandbox`, replacing any older copy.
pub async fn fetch_config_guess(
    url: &str,
    sandbox: &Path,
    limit: Duration,
) -> Result<PathBuf, FetchError> {
    let url = Url::parse(url)?;
    let host = url.host_str().unwrap_or_default().to_string();

    let client = reqwest::Client::builder()
        .timeout(limit)
        .build()
        .map_err(|err| FetchError::Transfer(err.to_string()))?;

    let response = client
        .get(url.as_str())
        .send()
        .await
        .map_err(|err| FetchError::from_http(&host, err))?;

    if !response.status().is_success() {
        return Err(FetchError::Transfer(format!(
            "{} returned {}",
            url,
            response.status()
        )));
    }

    let script = response
        .bytes()
        .await
        .map_err(|err| FetchError::from_http(&host, err))?;

    let path = sandbox.join(CONFIG_GUESS);

    fs::write(&path, &script).await?;

    info!("downloaded {}", path.display());

    Ok(path)
}

/// Runs config.guess and returns the build machine triple.
pub async fn guess_system(script: &Path) -> Result<String, BuildError> {
    let dir = script.parent().unwrap_or(Path::new("."));

    let output = Command::new("sh")
        .arg(script)
        .current_dir(dir)
        .output()
        .await
        .map_err(|source| BuildError::Spawn {
            program: "sh".to_string(),
            source,
        })?;

    let system = String::from_utf8_lossy(&output.stdout).trim().to_string();

    if !output.status.success() || system.is_empty() {
        let log = dir.join("config_guess_error.log");

        let mut contents = output.stdout.clone();
        contents.extend_from_slice(&output.stderr);
        fs::write(&log, contents).await?;

        return Err(BuildError::StepFailed {
            stage: "config.guess".to_string(),
            log,
        });
    }

    debug!("build system: {}", system);

    Ok(system)
}

/// One core is left free when more than two are available.
pub fn make_jobs(cores: usize) -> usize {
    if cores > 2 {
        cores - 1
    } else {
        cores.max(1)
    }
}

pub fn available_jobs() -> usize {
    make_jobs(
        std::thread::available_parallelism()
            .map(|cores| cores.get())
            .unwrap_or(1),
    )
}
