use crate::error::BuildError;
use std::{
    env,
    path::{Path, PathBuf},
    process::Output,
    time::{Duration, Instant},
};
use tokio::{fs, process::Command};
use tracing::{debug, info};

pub mod recipes;
pub mod report;
pub mod run;
pub mod system;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    I686,
    X86_64,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::I686, Arch::X86_64];

    pub fn name(&self) -> &'static str {
        match self {
            Arch::I686 => "i686",
            Arch::X86_64 => "x86_64",
        }
    }

    pub fn target(&self) -> &'static str {
        match self {
            Arch::I686 => "i686-w64-mingw32",
            Arch::X86_64 => "x86_64-w64-mingw32",
        }
    }

    /// The prefix whose tools serve the build machine's word size.
    pub fn host() -> Self {
        if env::consts::ARCH.contains("64") {
            Arch::X86_64
        } else {
            Arch::I686
        }
    }
}

/// Compiler and search path applied to one child process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildEnv {
    pub compiler: Option<String>,
    pub search_path: Vec<PathBuf>,
}

impl BuildEnv {
    pub fn new(compiler: Option<&str>, search_path: Vec<PathBuf>) -> Self {
        Self {
            compiler: compiler.map(str::to_string),
            search_path,
        }
    }

    /// `search_path` entries placed before `original`.
    pub fn path_value(&self, original: &str) -> String {
        let mut paths: Vec<String> = self
            .search_path
            .iter()
            .map(|path| path.display().to_string())
            .collect();

        if !original.is_empty() {
            paths.push(original.to_string());
        }

        paths.join(":")
    }

    pub fn apply(&self, command: &mut Command) {
        if let Some(compiler) = &self.compiler {
            command.env("CC", compiler);
        }

        if !self.search_path.is_empty() {
            command.env("PATH", self.path_value(&env::var("PATH").unwrap_or_default()));
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub log_name: String,
}

impl Step {
    pub fn new(label: &str, program: &str, log_name: &str) -> Self {
        Self {
            label: label.to_string(),
            program: program.to_string(),
            args: vec![],
            log_name: log_name.to_string(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// `sh <script> args...`, logging to `config_error.log`.
    pub fn configure(label: &str, script: &Path) -> Self {
        Step::new(label, "sh", "config_error.log").arg(script.display().to_string())
    }

    /// `make [-j jobs] targets...`.
    pub fn make(label: &str, jobs: Option<usize>, targets: &[&str], log_name: &str) -> Self {
        let mut step = Step::new(label, "make", log_name);

        if let Some(jobs) = jobs {
            step = step.arg("-j").arg(jobs.to_string());
        }

        step.args(targets.iter().copied())
    }
}

/// Steps run in order inside one build directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub dir: PathBuf,
    /// Purge and recreate `dir` before the first step.
    pub fresh: bool,
    pub env: BuildEnv,
    pub steps: Vec<Step>,
}

async fn write_log(path: &Path, output: &Output) -> std::io::Result<()> {
    let mut log = output.stdout.clone();
    log.extend_from_slice(&output.stderr);

    fs::write(path, log).await
}

/// Runs one step, writing its captured output to the step's log on failure.
pub async fn run_step(dir: &Path, env: &BuildEnv, step: &Step) -> Result<(), BuildError> {
    debug!("{}: {} {}", step.label, step.program, step.args.join(" "));

    let mut command = Command::new(&step.program);

    command.args(&step.args);
    command.current_dir(dir);

    env.apply(&mut command);

    let output = command.output().await.map_err(|source| BuildError::Spawn {
        program: step.program.clone(),
        source,
    })?;

    if !output.status.success() {
        let log = dir.join(&step.log_name);

        write_log(&log, &output).await?;

        return Err(BuildError::StepFailed {
            stage: step.label.clone(),
            log,
        });
    }

    Ok(())
}

pub async fn run_plan(plan: &Plan) -> Result<(), BuildError> {
    if plan.fresh && plan.dir.exists() {
        info!("removing old build directory: {}", plan.dir.display());
        fs::remove_dir_all(&plan.dir).await?;
    }

    fs::create_dir_all(&plan.dir).await?;

    for step in &plan.steps {
        info!("{}", step.label);
        run_step(&plan.dir, &plan.env, step).await?;
    }

    Ok(())
}

/// Wall-clock time per stage, in the order the stages ran.
#[derive(Clone, Debug, Default)]
pub struct Timings {
    stages: Vec<(String, Duration)>,
}

impl Timings {
    pub fn record(&mut self, stage: &str, elapsed: Duration) {
        self.stages.push((stage.to_string(), elapsed));
    }

    pub fn record_since(&mut self, stage: &str, started: Instant) {
        self.record(stage, started.elapsed());
    }

    pub fn stages(&self) -> &[(String, Duration)] {
        &self.stages
    }

    pub fn minutes(elapsed: &Duration) -> f64 {
        elapsed.as_secs_f64() / 60.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell(label: &str, script: &str) -> Step {
        Step::new(label, "sh", "build_error.log").arg("-c").arg(script)
    }

    #[test]
    fn search_path_goes_first() {
        let env = BuildEnv::new(None, vec![PathBuf::from("/s/mingw-w64-i686/bin")]);

        assert_eq!(
            env.path_value("/usr/bin:/bin"),
            "/s/mingw-w64-i686/bin:/usr/bin:/bin"
        );
        assert_eq!(env.path_value(""), "/s/mingw-w64-i686/bin");
    }

    #[test]
    fn make_step_args() {
        let step = Step::make("build gcc", Some(3), &["all-gcc"], "build_error.log");

        assert_eq!(step.program, "make");
        assert_eq!(step.args, vec!["-j", "3", "all-gcc"]);

        let step = Step::make("install gcc", None, &["install-gcc"], "install_error.log");

        assert_eq!(step.args, vec!["install-gcc"]);
    }

    #[tokio::test]
    async fn failed_step_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let env = BuildEnv::new(Some("cross-gcc"), vec![PathBuf::from("/opt/cross/bin")]);

        let err = run_step(
            dir.path(),
            &env,
            &shell("build test", "echo \"CC=$CC\"; echo \"PATH=$PATH\"; echo oops >&2; exit 3"),
        )
        .await
        .unwrap_err();

        let log = dir.path().join("build_error.log");

        assert!(matches!(err, BuildError::StepFailed { log: ref path, .. } if *path == log));

        let contents = std::fs::read_to_string(&log).unwrap();

        assert!(contents.contains("CC=cross-gcc"));
        assert!(contents.contains("PATH=/opt/cross/bin:"));
        assert!(contents.contains("oops"));
    }

    #[tokio::test]
    async fn environment_does_not_leak_into_process() {
        let dir = tempfile::tempdir().unwrap();
        let before = env::var("CC").ok();

        run_step(
            dir.path(),
            &BuildEnv::new(Some("scoped-gcc"), vec![]),
            &shell("noop", "test \"$CC\" = scoped-gcc"),
        )
        .await
        .unwrap();

        assert_eq!(env::var("CC").ok(), before);
        assert!(!dir.path().join("build_error.log").exists());
    }

    #[tokio::test]
    async fn missing_program_is_spawn_error() {
        let dir = tempfile::tempdir().unwrap();

        let result = run_step(
            dir.path(),
            &BuildEnv::default(),
            &Step::new("nothing", "mwtc-no-such-program", "build_error.log"),
        )
        .await;

        assert!(matches!(result, Err(BuildError::Spawn { .. })));
    }

    #[tokio::test]
    async fn fresh_plan_purges_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("build/gmp");

        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("stale.o"), b"old").unwrap();

        let plan = Plan {
            dir: dir.clone(),
            fresh: true,
            env: BuildEnv::default(),
            steps: vec![shell("touch", "touch built")],
        };

        run_plan(&plan).await.unwrap();

        assert!(!dir.join("stale.o").exists());
        assert!(dir.join("built").exists());
    }

    #[tokio::test]
    async fn plan_stops_at_first_failure() {
        let root = tempfile::tempdir().unwrap();

        let plan = Plan {
            dir: root.path().join("build"),
            fresh: false,
            env: BuildEnv::default(),
            steps: vec![
                shell("fail", "exit 1"),
                shell("never", "touch reached"),
            ],
        };

        assert!(run_plan(&plan).await.is_err());
        assert!(!root.path().join("build/reached").exists());
    }

    #[test]
    fn timings_keep_order() {
        let mut timings = Timings::default();

        timings.record("Downloading", Duration::from_secs(90));
        timings.record("Binutils", Duration::from_secs(30));

        let names: Vec<&str> = timings.stages().iter().map(|(n, _)| n.as_str()).collect();

        assert_eq!(names, vec!["Downloading", "Binutils"]);
        assert_eq!(Timings::minutes(&timings.stages()[0].1), 1.5);
    }
}
