use crate::builder::{Arch, BuildEnv, Plan, Step};
use crate::store::paths::{get_build_dir_path, get_package_dir_path, get_prefix_dir_path};
use std::env;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Everything the build recipes need to know about the sandbox and host.
#[derive(Clone, Debug)]
pub struct Toolchain {
    pub sandbox: PathBuf,
    /// Build machine triple from config.guess.
    pub system: String,
    pub jobs: usize,
    pub sjlj: bool,
}

/// Install prefixes of the host libraries gcc links against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostLibs {
    pub gmp: PathBuf,
    pub mpfr: PathBuf,
    pub isl: PathBuf,
    pub mpc: PathBuf,
}

impl Toolchain {
    pub fn prefix(&self, arch: Arch) -> PathBuf {
        get_prefix_dir_path(&self.sandbox, arch.name())
    }

    pub fn bin(&self, arch: Arch) -> PathBuf {
        self.prefix(arch).join("bin")
    }

    pub fn build_dir(&self, name: &str) -> PathBuf {
        get_build_dir_path(&self.sandbox).join(name)
    }

    /// `pkgs/<name>/<name>-<machine>`.
    pub fn library_prefix(&self, name: &str) -> PathBuf {
        get_package_dir_path(&self.sandbox)
            .join(name)
            .join(format!("{}-{}", name, env::consts::ARCH))
    }

    fn build_flag(&self) -> String {
        format!("--build={}", self.system)
    }

    /// System compiler with the host-width prefix tools on the search path.
    pub fn host_env(&self) -> BuildEnv {
        BuildEnv::new(Some("gcc"), vec![self.bin(Arch::host())])
    }

    /// The freshly built cross compiler for `arch`.
    pub fn cross_env(&self, arch: Arch) -> BuildEnv {
        BuildEnv::new(
            Some(&format!("{}-gcc", arch.target())),
            vec![self.bin(arch)],
        )
    }
}

fn flag(name: &str, value: &Path) -> String {
    format!("--{}={}", name, value.display())
}

pub fn binutils(tc: &Toolchain, source: &Path) -> Vec<Plan> {
    Arch::ALL
        .iter()
        .map(|arch| {
            let prefix = tc.prefix(*arch);
            let label = format!("binutils {}", arch.name());

            Plan {
                dir: tc.build_dir("binutils").join(arch.name()),
                fresh: true,
                env: BuildEnv::new(Some("gcc"), vec![]),
                steps: vec![
                    Step::configure(&format!("configure {}", label), &source.join("configure"))
                        .arg(tc.build_flag())
                        .arg(format!("--target={}", arch.target()))
                        .arg(flag("prefix", &prefix))
                        .arg(flag("with-sysroot", &prefix))
                        .args([
                            "--disable-multilib",
                            "--disable-nls",
                            "--disable-shared",
                            "--enable-static",
                        ]),
                    Step::make(
                        &format!("build {}", label),
                        Some(tc.jobs),
                        &[],
                        "build_error.log",
                    ),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install"],
                        "install_error.log",
                    ),
                ],
            }
        })
        .collect()
}

pub fn mingw_headers(tc: &Toolchain, source: &Path) -> Vec<Plan> {
    let script = source.join("mingw-w64-headers").join("configure");

    Arch::ALL
        .iter()
        .map(|arch| {
            let label = format!("mingw-w64 headers {}", arch.name());

            Plan {
                dir: tc.build_dir("header").join(arch.name()),
                fresh: true,
                env: BuildEnv::new(None, vec![tc.bin(*arch)]),
                steps: vec![
                    Step::configure(&format!("configure {}", label), &script)
                        .arg("--enable-sdk-all")
                        .arg(tc.build_flag())
                        .arg(format!("--host={}", arch.target()))
                        .arg(flag("prefix", &tc.prefix(*arch))),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install"],
                        "install_error.log",
                    ),
                ],
            }
        })
        .collect()
}

/// Configure, build and install a static host library into its prefix.
fn host_library(tc: &Toolchain, name: &str, source: &Path, options: Vec<String>) -> Plan {
    let label = name.to_string();

    Plan {
        dir: tc.build_dir(name),
        fresh: true,
        env: tc.host_env(),
        steps: vec![
            Step::configure(&format!("configure {}", label), &source.join("configure"))
                .arg(tc.build_flag())
                .arg(flag("prefix", &tc.library_prefix(name)))
                .args(options),
            Step::make(
                &format!("build {}", label),
                Some(tc.jobs),
                &[],
                "build_error.log",
            ),
            Step::make(
                &format!("install {}", label),
                None,
                &["install"],
                "install_error.log",
            ),
        ],
    }
}

fn static_only() -> Vec<String> {
    vec!["--disable-shared".to_string(), "--enable-static".to_string()]
}

pub fn gmp(tc: &Toolchain, source: &Path) -> Plan {
    host_library(
        tc,
        "gmp",
        source,
        vec![
            "--enable-fat".to_string(),
            "--disable-shared".to_string(),
            "--enable-static".to_string(),
            "--enable-cxx".to_string(),
            "CPPFLAGS=-fexceptions".to_string(),
        ],
    )
}

pub fn mpfr(tc: &Toolchain, source: &Path, gmp: &Path) -> Plan {
    let mut options = vec![flag("with-gmp", gmp)];
    options.extend(static_only());

    host_library(tc, "mpfr", source, options)
}

pub fn isl(tc: &Toolchain, source: &Path, gmp: &Path) -> Plan {
    let mut options = vec![
        flag("with-gmp-prefix", gmp),
        "--with-piplib=no".to_string(),
        "--with-clang=no".to_string(),
    ];
    options.extend(static_only());

    host_library(tc, "isl", source, options)
}

pub fn cloog(tc: &Toolchain, source: &Path, gmp: &Path) -> Plan {
    let mut options = vec![
        flag("with-gmp-prefix", gmp),
        "--with-bits=gmp".to_string(),
        "--with-isl=bundled".to_string(),
    ];
    options.extend(static_only());

    host_library(tc, "cloog", source, options)
}

pub fn mpc(tc: &Toolchain, source: &Path, gmp: &Path, mpfr: &Path) -> Plan {
    let mut options = vec![flag("with-gmp", gmp), flag("with-mpfr", mpfr)];
    options.extend(static_only());

    host_library(tc, "mpc", source, options)
}

pub fn gcc_build_dir(tc: &Toolchain, arch: Arch) -> PathBuf {
    tc.build_dir("gcc").join(arch.name())
}

/// Bootstrap compiler only; the runtime libraries follow in stage two.
pub fn gcc_stage1(tc: &Toolchain, source: &Path, libs: &HostLibs) -> Vec<Plan> {
    Arch::ALL
        .iter()
        .map(|arch| {
            let prefix = tc.prefix(*arch);
            let label = format!("gcc (1 of 2) {}", arch.name());

            let exceptions = if tc.sjlj && *arch == Arch::I686 {
                "--enable-sjlj-exceptions"
            } else {
                "--disable-sjlj-exceptions"
            };

            Plan {
                dir: gcc_build_dir(tc, *arch),
                fresh: true,
                env: BuildEnv::new(Some("gcc"), vec![tc.bin(*arch)]),
                steps: vec![
                    Step::configure(&format!("configure {}", label), &source.join("configure"))
                        .arg(tc.build_flag())
                        .arg(format!("--target={}", arch.target()))
                        .arg(flag("prefix", &prefix))
                        .arg(flag("with-sysroot", &prefix))
                        .args([
                            "--enable-static",
                            "--disable-shared",
                            "--disable-nls",
                            "--disable-multilib",
                            "--enable-languages=c,c++",
                            "--enable-lto",
                            "--enable-fully-dynamic-string",
                            "--enable-threads=posix",
                            exceptions,
                        ])
                        .arg(flag("with-mpc", &libs.mpc))
                        .arg(flag("with-mpfr", &libs.mpfr))
                        .arg(flag("with-isl", &libs.isl))
                        .arg(flag("with-gmp", &libs.gmp)),
                    Step::make(
                        &format!("build {}", label),
                        Some(tc.jobs),
                        &["all-gcc"],
                        "build_error.log",
                    ),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install-gcc"],
                        "install_error.log",
                    ),
                ],
            }
        })
        .collect()
}

pub fn crt(tc: &Toolchain, source: &Path) -> Vec<Plan> {
    let script = source.join("mingw-w64-crt").join("configure");

    Arch::ALL
        .iter()
        .map(|arch| {
            let prefix = tc.prefix(*arch);
            let label = format!("mingw-w64 crt {}", arch.name());

            Plan {
                dir: tc.build_dir("crt").join(arch.name()),
                fresh: true,
                env: tc.cross_env(*arch),
                steps: vec![
                    Step::configure(&format!("configure {}", label), &script)
                        .arg(tc.build_flag())
                        .arg(format!("--host={}", arch.target()))
                        .arg(flag("prefix", &prefix))
                        .arg(flag("with-sysroot", &prefix)),
                    Step::make(
                        &format!("build {}", label),
                        Some(tc.jobs),
                        &[],
                        "build_error.log",
                    ),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install"],
                        "install_error.log",
                    ),
                ],
            }
        })
        .collect()
}

pub fn winpthreads(tc: &Toolchain, source: &Path) -> Vec<Plan> {
    let script = source
        .join("mingw-w64-libraries")
        .join("winpthreads")
        .join("configure");

    Arch::ALL
        .iter()
        .map(|arch| {
            let label = format!("winpthreads {}", arch.name());

            Plan {
                dir: tc.build_dir("winpthreads").join(arch.name()),
                fresh: true,
                env: tc.cross_env(*arch),
                steps: vec![
                    Step::configure(&format!("configure {}", label), &script)
                        .arg(tc.build_flag())
                        .arg(format!("--host={}", arch.target()))
                        .arg(flag("prefix", &tc.prefix(*arch)))
                        .args(static_only()),
                    Step::make(&format!("build {}", label), None, &[], "build_error.log"),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install"],
                        "install_error.log",
                    ),
                ],
            }
        })
        .collect()
}

/// Continues in the stage one build directories.
pub fn gcc_stage2(tc: &Toolchain) -> Vec<Plan> {
    Arch::ALL
        .iter()
        .map(|arch| {
            let label = format!("gcc (2 of 2) {}", arch.name());

            Plan {
                dir: gcc_build_dir(tc, *arch),
                fresh: false,
                env: BuildEnv::new(Some("gcc"), vec![tc.bin(*arch)]),
                steps: vec![
                    Step::make(
                        &format!("build libgcc {}", arch.name()),
                        Some(tc.jobs),
                        &["all-target-libgcc"],
                        "build_error_libgcc.log",
                    ),
                    Step::make(
                        &format!("install libgcc {}", arch.name()),
                        None,
                        &["install-target-libgcc"],
                        "install_error_libgcc.log",
                    ),
                    Step::make(
                        &format!("build {}", label),
                        Some(tc.jobs),
                        &[],
                        "build_error_gcc.log",
                    ),
                    Step::make(
                        &format!("install {}", label),
                        None,
                        &["install-strip"],
                        "install_error_gcc.log",
                    ),
                ],
            }
        })
        .collect()
}

async fn symlink_unless_present(original: &str, link: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(link).await.is_ok() {
        return Ok(());
    }

    debug!("linking {} -> {}", link.display(), original);

    fs::symlink(original, link).await
}

/// `<prefix>/mingw -> ./<target>` and `<prefix>/<target>/include -> ../include`.
pub async fn link_headers(prefix: &Path, target: &str) -> std::io::Result<()> {
    let target_dir = prefix.join(target);

    fs::create_dir_all(&target_dir).await?;

    symlink_unless_present(&format!("./{}", target), &prefix.join("mingw")).await?;
    symlink_unless_present("../include", &target_dir.join("include")).await
}

/// Moves `<prefix>/<target>/lib` up to `<prefix>/lib` and links it back.
pub async fn relocate_crt_libs(prefix: &Path, target: &str) -> std::io::Result<()> {
    let from = prefix.join(target).join("lib");
    let to = prefix.join("lib");

    let from_is_dir = fs::symlink_metadata(&from)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);

    if from_is_dir {
        if to.exists() {
            let mut entries = fs::read_dir(&from).await?;

            while let Some(entry) = entries.next_entry().await? {
                fs::rename(entry.path(), to.join(entry.file_name())).await?;
            }

            fs::remove_dir(&from).await?;
        } else {
            fs::rename(&from, &to).await?;
        }
    }

    symlink_unless_present("../lib", &from).await
}
