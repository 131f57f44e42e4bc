use crate::builder::{Arch, BuildEnv, Timings};
use crate::store::paths::get_prefix_dir_path;
use anyhow::{Context as _, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::fs;
use tracing::info;

const README: &str = r#"Mingw-w64 Toolchain built on {{ date }}
===================================================================
To use the 32-bit toolchain, add the following to the start of PATH
{{ path32 }}
RUN "source use32.sh" to automate
To use the 64-bit toolchain, add the following to the start of PATH
{{ path64 }}
RUN "source use64.sh" to do this for you
The original PATH:
{{ original_path }}
RUN "source restore.sh" to get back original PATH

Time consumed for building each component (in minutes)
===================================================================
{% for stage in stages -%}
{{ stage.name }}: {{ stage.minutes }}
{% endfor %}"#;

const USE_SCRIPT: &str = r#"#!/bin/sh
export PATH="{{ path }}"
{{ target }}-gcc -v
"#;

const RESTORE_SCRIPT: &str = r#"#!/bin/sh
export PATH="{{ path }}"
printf "Original PATH restored\n"
"#;

#[derive(Serialize)]
struct StageTime {
    name: String,
    minutes: String,
}

pub struct Report {
    pub readme: PathBuf,
    pub scripts: Vec<PathBuf>,
}

fn render(tera: &Tera, name: &str, context: &Context) -> Result<String> {
    tera.render(name, context)
        .with_context(|| format!("failed to render {}", name))
}

async fn write_script(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    }

    Ok(())
}

/// Writes readme.txt and the PATH helper scripts into `sandbox`.
pub async fn generate(sandbox: &Path, original_path: &str, timings: &Timings) -> Result<Report> {
    let mut tera = Tera::default();

    tera.add_raw_template("readme", README)?;
    tera.add_raw_template("use", USE_SCRIPT)?;
    tera.add_raw_template("restore", RESTORE_SCRIPT)?;

    let bin = |arch: Arch| get_prefix_dir_path(sandbox, arch.name()).join("bin");

    let date = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .context("failed to format build time")?;

    let stages: Vec<StageTime> = timings
        .stages()
        .iter()
        .map(|(name, elapsed)| StageTime {
            name: name.clone(),
            minutes: format!("{:.2}", Timings::minutes(elapsed)),
        })
        .collect();

    let mut context = Context::new();
    context.insert("date", &date);
    context.insert("path32", &bin(Arch::I686).display().to_string());
    context.insert("path64", &bin(Arch::X86_64).display().to_string());
    context.insert("original_path", original_path);
    context.insert("stages", &stages);

    let readme = sandbox.join("readme.txt");

    fs::write(&readme, render(&tera, "readme", &context)?)
        .await
        .with_context(|| format!("failed to write {}", readme.display()))?;

    info!("generated {}", readme.display());

    let mut scripts = vec![];

    for (arch, file) in [(Arch::I686, "use32.sh"), (Arch::X86_64, "use64.sh")] {
        let env = BuildEnv::new(None, vec![bin(arch)]);

        let mut context = Context::new();
        context.insert("path", &env.path_value(original_path));
        context.insert("target", arch.target());

        let path = sandbox.join(file);
        write_script(&path, &render(&tera, "use", &context)?).await?;
        scripts.push(path);
    }

    let mut context = Context::new();
    context.insert("path", original_path);

    let path = sandbox.join("restore.sh");
    write_script(&path, &render(&tera, "restore", &context)?).await?;
    scripts.push(path);

    Ok(Report { readme, scripts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn writes_readme_and_scripts() {
        let sandbox = tempfile::tempdir().unwrap();
        let mut timings = Timings::default();

        timings.record("Downloading", Duration::from_secs(90));
        timings.record("Binutils", Duration::from_secs(600));

        let report = generate(sandbox.path(), "/usr/bin:/bin", &timings)
            .await
            .unwrap();

        let readme = std::fs::read_to_string(&report.readme).unwrap();

        assert!(readme.contains("Downloading: 1.50"));
        assert!(readme.contains("Binutils: 10.00"));
        assert!(readme.contains(&sandbox.path().join("mingw-w64-i686/bin").display().to_string()));
        assert!(readme.contains("/usr/bin:/bin"));

        let use32 = std::fs::read_to_string(sandbox.path().join("use32.sh")).unwrap();

        assert!(use32.starts_with("#!/bin/sh\n"));
        assert!(use32.contains(&format!(
            "export PATH=\"{}:/usr/bin:/bin\"",
            sandbox.path().join("mingw-w64-i686/bin").display()
        )));
        assert!(use32.contains("i686-w64-mingw32-gcc -v"));

        let restore = std::fs::read_to_string(sandbox.path().join("restore.sh")).unwrap();

        assert!(restore.contains("export PATH=\"/usr/bin:/bin\""));
        assert_eq!(report.scripts.len(), 3);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            for script in &report.scripts {
                let mode = std::fs::metadata(script).unwrap().permissions().mode();
                assert_eq!(mode & 0o111, 0o111);
            }
        }
    }
}
