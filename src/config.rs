use crate::source::{version::VersionOrder, SourceContext};
use crate::store::paths::SaveTarget;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const GNU_SERVER: &str = "ftp.yzu.edu.tw";
pub const GCC_SERVER: &str = "gcc.gnu.org";

pub const GNU_MIRRORS: [&str; 11] = [
    "mirror.jre655.com",
    "ftp.yzu.edu.tw",
    "reflection.oss.ou.edu",
    "mirrors.ocf.berkeley.edu",
    "mirrorservice.org",
    "ftp.igh.cnrs.fr",
    "mirror.checkdomain.de",
    "ftp.unicamp.br",
    "gnu.mirror.iweb.com",
    "mirror.tochlab.net",
    "ftp.gnu.org",
];

pub const GCC_MIRRORS: [&str; 5] = [
    "ftp.irisa.fr",
    "ftp.fu-berlin.de",
    "ftp.ntua.gr",
    "ftp.nluug.nl",
    "gcc.gnu.org",
];

pub const CONFIG_GUESS_URL: &str =
    "https://raw.githubusercontent.com/gcc-mirror/gcc/master/config.guess";

pub const MINGW_RELEASES_URL: &str = "https://github.com/mirror/mingw-w64/releases";

/// Matches every listed version, so the latest one is taken.
pub const LATEST: &str = "99";

pub const SETTINGS_FILE: &str = "mwtc.toml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Component {
    Binutils,
    Gcc,
    Gmp,
    Mpfr,
    Mpc,
    Isl,
    Cloog,
    Mingw64,
}

impl Component {
    pub const ALL: [Component; 8] = [
        Component::Binutils,
        Component::Gcc,
        Component::Gmp,
        Component::Mpfr,
        Component::Mpc,
        Component::Isl,
        Component::Cloog,
        Component::Mingw64,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Component::Binutils => "binutils",
            Component::Gcc => "gcc",
            Component::Gmp => "gmp",
            Component::Mpfr => "mpfr",
            Component::Mpc => "mpc",
            Component::Isl => "isl",
            Component::Cloog => "cloog",
            Component::Mingw64 => "mingw64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Component::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Leading token of the directory the archive unpacks to.
    pub fn dir_token(&self) -> &'static str {
        match self {
            Component::Mingw64 => "mingw-w64",
            other => other.name(),
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which mirror set serves a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorGroup {
    Gnu,
    Gcc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Ftp {
        group: MirrorGroup,
        folder: String,
        /// Version-named subfolder to descend into first.
        folder_pattern: Option<String>,
    },
    Html {
        url: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ComponentSource {
    pub component: Component,
    pub location: Location,
    pub file_pattern: String,
    pub file_group: usize,
    pub preferred_version: String,
    pub save: SaveTarget,
}

fn infrastructure(component: Component, extension: &str) -> ComponentSource {
    ComponentSource {
        component,
        location: Location::Ftp {
            group: MirrorGroup::Gcc,
            folder: "/pub/gcc/infrastructure/".to_string(),
            folder_pattern: None,
        },
        file_pattern: format!(r"^{}-([0-9.]+).tar.{}$", component.name(), extension),
        file_group: 1,
        preferred_version: LATEST.to_string(),
        save: SaveTarget::parse(&format!("dl/{}.tar.{}", component.name(), extension)),
    }
}

/// Where each component is published, in acquisition order.
pub fn default_sources() -> Vec<ComponentSource> {
    vec![
        ComponentSource {
            component: Component::Binutils,
            location: Location::Ftp {
                group: MirrorGroup::Gnu,
                folder: "/pub/gnu/binutils/".to_string(),
                folder_pattern: None,
            },
            file_pattern: r"^binutils-([0-9.]+).tar.bz2$".to_string(),
            file_group: 1,
            preferred_version: LATEST.to_string(),
            save: SaveTarget::parse("dl/binutils.tar.bz2"),
        },
        ComponentSource {
            component: Component::Gcc,
            location: Location::Ftp {
                group: MirrorGroup::Gcc,
                folder: "/pub/gcc/releases/".to_string(),
                folder_pattern: Some(r"^gcc-([0-9.]+)$".to_string()),
            },
            file_pattern: r"^gcc-([0-9.]+).tar.gz$".to_string(),
            file_group: 1,
            preferred_version: LATEST.to_string(),
            save: SaveTarget::parse("dl/gcc.tar.gz"),
        },
        infrastructure(Component::Gmp, "bz2"),
        infrastructure(Component::Mpfr, "bz2"),
        infrastructure(Component::Mpc, "gz"),
        infrastructure(Component::Isl, "bz2"),
        infrastructure(Component::Cloog, "gz"),
        ComponentSource {
            component: Component::Mingw64,
            location: Location::Html {
                url: MINGW_RELEASES_URL.to_string(),
            },
            file_pattern: r".+?([0-9.]+).tar.gz$".to_string(),
            file_group: 1,
            preferred_version: LATEST.to_string(),
            save: SaveTarget::parse("dl/mingw64.tar.gz"),
        },
    ]
}

/// The hosts chosen for each mirror group.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Servers {
    pub gnu: String,
    pub gcc: String,
}

impl Servers {
    pub fn defaults() -> Self {
        Self {
            gnu: GNU_SERVER.to_string(),
            gcc: GCC_SERVER.to_string(),
        }
    }

    /// The chosen host followed by the group's default.
    pub fn hosts(&self, group: MirrorGroup) -> Vec<String> {
        let (chosen, fallback) = match group {
            MirrorGroup::Gnu => (&self.gnu, GNU_SERVER),
            MirrorGroup::Gcc => (&self.gcc, GCC_SERVER),
        };

        if chosen == fallback {
            return vec![chosen.clone()];
        }

        vec![chosen.clone(), fallback.to_string()]
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct MirrorSettings {
    pub gnu: Option<Vec<String>>,
    pub gcc: Option<Vec<String>>,
}

/// One configuration layer. Unset keys fall through to the layer below.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub sandbox: Option<String>,
    pub download_workers: Option<usize>,
    pub probe_timeout_secs: Option<u64>,
    pub ftp_timeout_secs: Option<u64>,
    pub http_timeout_secs: Option<u64>,
    pub version_order: Option<VersionOrder>,
    pub sjlj: Option<bool>,
    /// Preferred version per component name.
    pub versions: BTreeMap<String, String>,
    pub mirrors: MirrorSettings,
}

impl Settings {
    pub fn defaults() -> Self {
        Self {
            sandbox: Some("~/MWTC/".to_string()),
            download_workers: Some(2),
            probe_timeout_secs: Some(5),
            ftp_timeout_secs: Some(60),
            http_timeout_secs: Some(600),
            version_order: Some(VersionOrder::Lexical),
            sjlj: Some(false),
            versions: Component::ALL
                .iter()
                .map(|component| (component.name().to_string(), LATEST.to_string()))
                .collect(),
            mirrors: MirrorSettings {
                gnu: Some(GNU_MIRRORS.iter().map(|h| h.to_string()).collect()),
                gcc: Some(GCC_MIRRORS.iter().map(|h| h.to_string()).collect()),
            },
        }
    }

    /// Returns a layer where values set in `over` replace those in `self`.
    pub fn merge(&self, over: &Settings) -> Settings {
        let mut versions = self.versions.clone();
        versions.extend(over.versions.clone());

        Settings {
            sandbox: over.sandbox.clone().or_else(|| self.sandbox.clone()),
            download_workers: over.download_workers.or(self.download_workers),
            probe_timeout_secs: over.probe_timeout_secs.or(self.probe_timeout_secs),
            ftp_timeout_secs: over.ftp_timeout_secs.or(self.ftp_timeout_secs),
            http_timeout_secs: over.http_timeout_secs.or(self.http_timeout_secs),
            version_order: over.version_order.or(self.version_order),
            sjlj: over.sjlj.or(self.sjlj),
            versions,
            mirrors: MirrorSettings {
                gnu: over.mirrors.gnu.clone().or_else(|| self.mirrors.gnu.clone()),
                gcc: over.mirrors.gcc.clone().or_else(|| self.mirrors.gcc.clone()),
            },
        }
    }

    pub fn sandbox_path(&self) -> Result<PathBuf> {
        let sandbox = self.sandbox.as_deref().unwrap_or("~/MWTC/");
        let path = expand_home(sandbox);

        if path.is_absolute() {
            return Ok(path);
        }

        Ok(std::env::current_dir()
            .context("failed to read current directory")?
            .join(path))
    }

    pub fn resolve(&self) -> Result<Config> {
        let merged = Settings::defaults().merge(self);

        let seconds = |value: Option<u64>| Duration::from_secs(value.unwrap_or_default().max(1));

        if let Some(name) = merged
            .versions
            .keys()
            .find(|name| Component::from_name(name).is_none())
        {
            bail!("unknown component in [versions]: {}", name);
        }

        let sources = default_sources()
            .into_iter()
            .map(|mut source| {
                if let Some(version) = merged.versions.get(source.component.name()) {
                    source.preferred_version = version.clone();
                }
                source
            })
            .collect();

        Ok(Config {
            sandbox: merged.sandbox_path()?,
            download_workers: merged.download_workers.unwrap_or(2).max(1),
            probe_timeout: seconds(merged.probe_timeout_secs),
            ftp_timeout: seconds(merged.ftp_timeout_secs),
            http_timeout: seconds(merged.http_timeout_secs),
            version_order: merged.version_order.unwrap_or_default(),
            sjlj: merged.sjlj.unwrap_or_default(),
            gnu_mirrors: merged.mirrors.gnu.unwrap_or_default(),
            gcc_mirrors: merged.mirrors.gcc.unwrap_or_default(),
            sources,
            config_guess_url: CONFIG_GUESS_URL.to_string(),
        })
    }
}

/// Fully resolved configuration, built once and passed to every component.
#[derive(Clone, Debug)]
pub struct Config {
    pub sandbox: PathBuf,
    pub download_workers: usize,
    pub probe_timeout: Duration,
    pub ftp_timeout: Duration,
    pub http_timeout: Duration,
    pub version_order: VersionOrder,
    pub sjlj: bool,
    pub gnu_mirrors: Vec<String>,
    pub gcc_mirrors: Vec<String>,
    pub sources: Vec<ComponentSource>,
    pub config_guess_url: String,
}

impl Config {
    pub fn source_context(&self) -> SourceContext {
        SourceContext {
            sandbox: self.sandbox.clone(),
            ftp_timeout: self.ftp_timeout,
            http_timeout: self.http_timeout,
            order: self.version_order,
        }
    }
}

pub fn expand_home(value: &str) -> PathBuf {
    let rest = match value {
        "~" => Some(""),
        _ => value.strip_prefix("~/"),
    };

    match (rest, dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

/// Reads a settings layer from a TOML file.
pub fn load_settings(path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings from {}", path.display()))?;

    toml::from_str(&contents)
        .with_context(|| format!("failed to parse settings from {}", path.display()))
}

/// Layers defaults, the settings file and `cli` into a `Config`.
///
/// Without an explicit `path`, `<sandbox>/mwtc.toml` is read when it exists.
pub fn load(path: Option<&Path>, cli: &Settings) -> Result<Config> {
    let file = match path {
        Some(path) => load_settings(path)?,
        None => {
            let sandbox = Settings::defaults().merge(cli).sandbox_path()?;
            let path = sandbox.join(SETTINGS_FILE);

            if path.is_file() {
                load_settings(&path)?
            } else {
                Settings::default()
            }
        }
    };

    Settings::defaults().merge(&file).merge(cli).resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(config: &Config, component: Component) -> &ComponentSource {
        config
            .sources
            .iter()
            .find(|s| s.component == component)
            .unwrap()
    }

    #[test]
    fn defaults_resolve() {
        let config = Settings::default().resolve().unwrap();

        assert_eq!(config.download_workers, 2);
        assert_eq!(config.version_order, VersionOrder::Lexical);
        assert!(!config.sjlj);
        assert_eq!(config.gnu_mirrors.len(), 11);
        assert_eq!(config.gcc_mirrors.len(), 5);
        assert_eq!(config.sources.len(), Component::ALL.len());
        assert!(config.sources.iter().all(|s| s.preferred_version == LATEST));
        assert!(config.sandbox.is_absolute());
    }

    #[test]
    fn later_layers_win() {
        let file: Settings = toml::from_str(
            r#"
            download_workers = 4
            version_order = "segmented"

            [versions]
            gcc = "9.2.0"
            binutils = "2.32"

            [mirrors]
            gcc = ["gcc.example.org"]
            "#,
        )
        .unwrap();

        let cli = Settings {
            download_workers: Some(3),
            versions: BTreeMap::from([("gcc".to_string(), "8.3.0".to_string())]),
            ..Default::default()
        };

        let config = Settings::defaults().merge(&file).merge(&cli).resolve().unwrap();

        assert_eq!(config.download_workers, 3);
        assert_eq!(config.version_order, VersionOrder::Segmented);
        assert_eq!(source(&config, Component::Gcc).preferred_version, "8.3.0");
        assert_eq!(source(&config, Component::Binutils).preferred_version, "2.32");
        assert_eq!(source(&config, Component::Gmp).preferred_version, LATEST);
        assert_eq!(config.gcc_mirrors, vec!["gcc.example.org".to_string()]);
        assert_eq!(config.gnu_mirrors.len(), 11);
    }

    #[test]
    fn workers_are_at_least_one() {
        let settings = Settings {
            download_workers: Some(0),
            ..Default::default()
        };

        assert_eq!(settings.resolve().unwrap().download_workers, 1);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Settings>("download_threads = 2").is_err());

        let settings: Settings = toml::from_str("[versions]\nllvm = \"17\"").unwrap();
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn home_is_expanded() {
        let Some(home) = dirs::home_dir() else {
            return;
        };

        assert_eq!(expand_home("~/MWTC/"), home.join("MWTC/"));
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("/opt/mwtc"), PathBuf::from("/opt/mwtc"));
    }

    #[test]
    fn sandbox_settings_file_is_read() {
        let sandbox = tempfile::tempdir().unwrap();

        fs::write(sandbox.path().join(SETTINGS_FILE), "sjlj = true\n").unwrap();

        let cli = Settings {
            sandbox: Some(sandbox.path().display().to_string()),
            ..Default::default()
        };

        let config = load(None, &cli).unwrap();

        assert!(config.sjlj);
        assert_eq!(config.sandbox, sandbox.path());
    }

    #[test]
    fn explicit_settings_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();

        assert!(load(Some(&dir.path().join("missing.toml")), &Settings::default()).is_err());
    }

    #[test]
    fn fallback_host_follows_chosen_host() {
        let servers = Servers {
            gnu: "mirror.example.org".to_string(),
            gcc: GCC_SERVER.to_string(),
        };

        assert_eq!(
            servers.hosts(MirrorGroup::Gnu),
            vec!["mirror.example.org".to_string(), GNU_SERVER.to_string()]
        );
        assert_eq!(servers.hosts(MirrorGroup::Gcc), vec![GCC_SERVER.to_string()]);
    }

    #[test]
    fn sources_save_under_download_dir() {
        for source in default_sources() {
            let path = source.save.resolve(Path::new("/s"), "remote.tar.gz");

            assert!(path.starts_with("/s/dl"));
            assert!(path
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(source.component.name()));
        }
    }
}
