use crate::error::FetchError;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Unknown,
}

/// One name from a remote listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub kind: EntryKind,
    pub modified: Option<String>,
}

impl ListingEntry {
    pub fn new(name: &str, kind: EntryKind, modified: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            modified: modified.map(str::to_string),
        }
    }

    /// Entry from a plain name listing, where kind and time are unknown.
    pub fn name_only(name: &str) -> Self {
        Self::new(name, EntryKind::Unknown, None)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionMatch {
    pub name: String,
    pub version: String,
}

/// How "latest" is decided when the preferred version is absent.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VersionOrder {
    /// Plain string comparison: "9.2" sorts after "10.1".
    #[default]
    Lexical,
    /// Dot separated segments compared numerically where both are numbers.
    Segmented,
}

impl VersionOrder {
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        match self {
            VersionOrder::Lexical => a.cmp(b),
            VersionOrder::Segmented => compare_segments(a, b),
        }
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');

    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let ordering = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    _ => l.cmp(r),
                };

                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

/// A file or directory name pattern whose capture group holds the version.
#[derive(Clone, Debug)]
pub struct VersionPattern {
    source: String,
    regex: Regex,
    group: usize,
}

impl VersionPattern {
    pub fn new(pattern: &str, group: usize) -> Result<Self, FetchError> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|err| {
            FetchError::InvalidPattern {
                pattern: pattern.to_string(),
                message: err.to_string(),
            }
        })?;

        // captures_len counts the implicit whole-match group
        if group == 0 || group >= regex.captures_len() {
            return Err(FetchError::InvalidPattern {
                pattern: pattern.to_string(),
                message: format!("capture group {} does not exist", group),
            });
        }

        Ok(Self {
            source: pattern.to_string(),
            regex,
            group,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Returns the version captured from `name` when the whole name matches.
    pub fn capture<'a>(&self, name: &'a str) -> Option<&'a str> {
        self.regex
            .captures(name)
            .and_then(|captures| captures.get(self.group))
            .map(|m| m.as_str())
    }
}

/// Picks the entry carrying `preferred`, or else the latest under `order`.
///
/// The first exact match in listing order wins. Without one, the maximal
/// version is returned; when several entries tie, the last one listed wins.
pub fn select<'a, I>(
    entries: I,
    pattern: &VersionPattern,
    preferred: &str,
    order: VersionOrder,
    location: &str,
) -> Result<VersionMatch, FetchError>
where
    I: IntoIterator<Item = &'a ListingEntry>,
{
    let matches: Vec<VersionMatch> = entries
        .into_iter()
        .filter_map(|entry| {
            pattern.capture(&entry.name).map(|version| VersionMatch {
                name: entry.name.clone(),
                version: version.to_string(),
            })
        })
        .collect();

    if let Some(found) = matches.iter().find(|m| m.version == preferred) {
        return Ok(found.clone());
    }

    matches
        .into_iter()
        .max_by(|a, b| order.compare(&a.version, &b.version))
        .ok_or_else(|| FetchError::NotFound {
            pattern: pattern.as_str().to_string(),
            location: location.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(names: &[&str]) -> Vec<ListingEntry> {
        names.iter().map(|n| ListingEntry::name_only(n)).collect()
    }

    fn pkg_pattern() -> VersionPattern {
        VersionPattern::new(r"pkg-([0-9.]+)\.tar\.gz", 1).unwrap()
    }

    #[test]
    fn preferred_wins_at_any_position() {
        let names = ["pkg-1.0.tar.gz", "pkg-2.5.tar.gz", "pkg-3.1.tar.gz"];

        for preferred in ["1.0", "2.5", "3.1"] {
            let listing = entries(&names);
            let found = select(
                &listing,
                &pkg_pattern(),
                preferred,
                VersionOrder::Lexical,
                "/",
            )
            .unwrap();

            assert_eq!(found.version, preferred);
            assert_eq!(found.name, format!("pkg-{}.tar.gz", preferred));
        }
    }

    #[test]
    fn latest_is_string_max() {
        let listing = entries(&[
            "pkg-7.1.0.tar.gz",
            "pkg-8.3.0.tar.gz",
            "pkg-10.0.1.tar.gz",
        ]);

        let found = select(&listing, &pkg_pattern(), "99", VersionOrder::Lexical, "/").unwrap();

        assert_eq!(found.version, "8.3.0");
    }

    #[test]
    fn segmented_order_is_numeric() {
        let listing = entries(&[
            "pkg-7.1.0.tar.gz",
            "pkg-8.3.0.tar.gz",
            "pkg-10.0.1.tar.gz",
        ]);

        let found = select(
            &listing,
            &pkg_pattern(),
            "99",
            VersionOrder::Segmented,
            "/",
        )
        .unwrap();

        assert_eq!(found.version, "10.0.1");
    }

    #[test]
    fn first_preferred_match_wins() {
        let pattern = VersionPattern::new(r"pkg-([0-9.]+)\.tar\.(gz|bz2)", 1).unwrap();
        let listing = entries(&["pkg-2.5.tar.bz2", "pkg-2.5.tar.gz"]);

        let found = select(&listing, &pattern, "2.5", VersionOrder::Lexical, "/").unwrap();

        assert_eq!(found.name, "pkg-2.5.tar.bz2");
    }

    #[test]
    fn tied_latest_takes_last_listed() {
        let pattern = VersionPattern::new(r"pkg-([0-9.]+)\.tar\.(gz|bz2)", 1).unwrap();
        let listing = entries(&["pkg-2.5.tar.bz2", "pkg-1.0.tar.gz", "pkg-2.5.tar.gz"]);

        let found = select(&listing, &pattern, "99", VersionOrder::Lexical, "/").unwrap();

        assert_eq!(found.name, "pkg-2.5.tar.gz");
    }

    #[test]
    fn requires_full_match() {
        let listing = entries(&["pkg-1.0.tar.gz.sig", "old-pkg-1.0.tar.gz"]);

        let result = select(&listing, &pkg_pattern(), "1.0", VersionOrder::Lexical, "/pub");

        assert!(matches!(result, Err(FetchError::NotFound { .. })));
    }

    #[test]
    fn anchored_patterns_still_compile() {
        let pattern = VersionPattern::new(r"^gcc-([0-9.]+).tar.gz$", 1).unwrap();

        assert_eq!(pattern.capture("gcc-9.2.0.tar.gz"), Some("9.2.0"));
        assert_eq!(pattern.capture("gcc-9.2.0.tar.gz.sig"), None);
    }

    #[test]
    fn missing_group_is_rejected() {
        assert!(VersionPattern::new(r"pkg-([0-9.]+)", 2).is_err());
        assert!(VersionPattern::new(r"pkg-([0-9.]+)", 0).is_err());
        assert!(VersionPattern::new(r"pkg-(", 1).is_err());
    }
}
