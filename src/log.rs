use crate::builder::Timings;
use crate::mirror::{Mirror, Probe};
use crate::source::acquire::Acquisition;
use crate::source::FetchStatus;
use crate::store::archives::ExtractStatus;
use console::style;
use std::path::Path;
use std::time::Duration;

pub fn badge_success() -> String {
    style("[✓]").green().to_string()
}

pub fn badge_error() -> String {
    style("[✗]").red().to_string()
}

pub fn format_stage_name(name: &str) -> String {
    format!("{} ➜", style(name).bold().on_color256(238))
}

pub fn print_stage_success(name: &str, elapsed: Duration) {
    println!(
        "{} {} min {}",
        format_stage_name(name),
        style(format!("{:.2}", Timings::minutes(&elapsed))).italic(),
        badge_success(),
    );
}

pub fn print_stage_error(name: &str, error: &dyn std::fmt::Display) {
    println!(
        "{} {} {}",
        format_stage_name(name),
        style(error.to_string()).red(),
        badge_error(),
    );
}

pub fn print_mirror(group: &str, mirror: Option<&Mirror>, fallback: &str) {
    match mirror {
        Some(mirror) => println!(
            "{} {} ({:?}) {}",
            format_stage_name(group),
            style(&mirror.host).italic(),
            mirror.latency,
            badge_success(),
        ),
        None => println!(
            "{} no mirror available, using {} {}",
            format_stage_name(group),
            style(fallback).italic(),
            badge_error(),
        ),
    }
}

pub fn print_probes(group: &str, probes: &[Probe]) {
    println!("{}", style(format!("{}:", group)).bold().green());

    for probe in probes {
        match probe.latency {
            Some(latency) => println!("- {} {:?}", probe.host, latency),
            None => println!("- {} {}", probe.host, style("unreachable").red()),
        }
    }
}

pub fn print_acquisition(acquisition: &Acquisition) {
    for (component, result) in acquisition {
        match result {
            Ok(acquired) => {
                let fetched = match acquired.fetched.status {
                    FetchStatus::Downloaded => "downloaded",
                    FetchStatus::AlreadyPresent => "present",
                };

                let extracted = match acquired.extract {
                    ExtractStatus::Extracted => "extracted",
                    ExtractStatus::Skipped => "unchanged",
                };

                println!(
                    "{} {} {}, {} {}",
                    format_stage_name(component.name()),
                    style(&acquired.fetched.version).italic(),
                    fetched,
                    extracted,
                    badge_success(),
                );
            }
            Err(err) => print_stage_error(component.name(), err),
        }
    }
}

pub fn print_report(readme: &Path) {
    println!(
        "{} Everything built OK, read {} before using the toolchain {}",
        style("Done:").bold().green(),
        style(readme.display().to_string()).italic(),
        badge_success(),
    );
}
