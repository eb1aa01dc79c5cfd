//! Parsers for dpkg, dpkg-query, apt-cache and apt-mark output
//!
//! Every parser assumes the command ran under `LC_ALL=C`.

use crossgrader_errors::PackageError;
use crossgrader_types::{Arch, InstalledPackage, PackageStatus, Priority};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// `dpkg-query -W` format producing one tab-separated record per instance
pub const INSTALLED_FORMAT: &str =
    "${Package}\t${Architecture}\t${Version}\t${Priority}\t${Status}\t${Pre-Depends}\t${Depends}\n";

const SUMMARY_HEADER: &str = "Errors were encountered while processing:";
const ARCHIVE_PREFIX: &str = "dpkg: error processing archive ";
const PACKAGE_PREFIX: &str = "dpkg: error processing package ";
const GLOBAL_PREFIX: &str = "dpkg: error: ";

/// Recognized failure signature of one unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Another instance of the same name is installed in a different architecture
    AmbiguousName,
    /// A pre-removal maintainer script of an installed instance failed
    PrermFailed,
    /// Dependency or pre-dependency not yet satisfied; ordering resolves it
    Dependency,
    /// No build in the target architecture
    Unavailable,
    DownloadFailed,
    Unrecognized,
}

impl FailureKind {
    /// Whether a known remediation exists for this signature
    #[must_use]
    pub fn is_remediable(self) -> bool {
        matches!(self, Self::AmbiguousName | Self::PrermFailed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AmbiguousName => "ambiguous_name",
            Self::PrermFailed => "prerm_failed",
            Self::Dependency => "dependency",
            Self::Unavailable => "unavailable",
            Self::DownloadFailed => "download_failed",
            Self::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unit named in a dpkg failure: a `.deb` that never reached the database,
/// or a package that did but failed to configure
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailedUnit {
    Archive(PathBuf),
    Package(String),
}

impl FailedUnit {
    fn parse(token: &str) -> Self {
        let token = token.trim();
        if std::path::Path::new(token)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("deb"))
        {
            Self::Archive(PathBuf::from(token))
        } else {
            Self::Package(token.to_string())
        }
    }

    /// Package name for package units, with any `:arch` suffix removed
    #[must_use]
    pub fn package_name(&self) -> Option<&str> {
        match self {
            Self::Package(p) => Some(p.split_once(':').map_or(p.as_str(), |(n, _)| n)),
            Self::Archive(_) => None,
        }
    }
}

impl fmt::Display for FailedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Archive(p) => write!(f, "{}", p.display()),
            Self::Package(p) => f.write_str(p),
        }
    }
}

/// One failure reported by a dpkg run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: FailedUnit,
    pub kind: FailureKind,
    pub message: String,
}

/// Result of one dpkg invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DpkgRunOutcome {
    pub exit_code: Option<i32>,
    pub failures: Vec<UnitFailure>,
    /// `dpkg: error:` lines not tied to a unit
    pub errors: Vec<String>,
}

impl DpkgRunOutcome {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.failures.is_empty() && self.errors.is_empty()
    }

    /// Failure reported for `unit`, if any
    #[must_use]
    pub fn failure_for(&self, unit: &FailedUnit) -> Option<&UnitFailure> {
        self.failures.iter().find(|f| &f.unit == unit)
    }

    /// Failure reported for the package `name` in any architecture
    #[must_use]
    pub fn failure_for_package(&self, name: &str) -> Option<&UnitFailure> {
        self.failures
            .iter()
            .find(|f| f.unit.package_name() == Some(name))
    }
}

/// Classify a dpkg error message
#[must_use]
pub fn classify(message: &str) -> FailureKind {
    let m = message.to_ascii_lowercase();
    if m.contains("ambiguous package name")
        || m.contains("multiple installed instances")
        || m.contains("more than one installed instance")
        || m.contains("is not co-installable with")
    {
        FailureKind::AmbiguousName
    } else if m.contains("pre-removal script") && m.contains("returned error") {
        FailureKind::PrermFailed
    } else if m.contains("dependency problems") || m.contains("pre-dependency problem") {
        FailureKind::Dependency
    } else {
        FailureKind::Unrecognized
    }
}

fn flush(current: &mut Option<(FailedUnit, Vec<String>)>, outcome: &mut DpkgRunOutcome) {
    if let Some((unit, lines)) = current.take() {
        let message = lines.join("\n");
        if outcome.failure_for(&unit).is_none() {
            outcome.failures.push(UnitFailure {
                unit,
                kind: classify(&message),
                message,
            });
        }
    }
}

/// Parse dpkg's stderr into per-unit failures
///
/// Unit messages come from `error processing archive|package` blocks; units
/// that only appear in the trailing summary get an empty message.
#[must_use]
pub fn parse_dpkg_errors(stderr: &str, exit_code: Option<i32>) -> DpkgRunOutcome {
    let mut outcome = DpkgRunOutcome {
        exit_code,
        ..DpkgRunOutcome::default()
    };
    let mut current: Option<(FailedUnit, Vec<String>)> = None;
    let mut in_summary = false;
    let mut summary_units = Vec::new();

    for line in stderr.lines() {
        if in_summary {
            if line.starts_with(' ') && !line.trim().is_empty() {
                summary_units.push(FailedUnit::parse(line));
                continue;
            }
            in_summary = false;
        }

        if line.trim() == SUMMARY_HEADER {
            flush(&mut current, &mut outcome);
            in_summary = true;
        } else if let Some(rest) = line
            .strip_prefix(ARCHIVE_PREFIX)
            .or_else(|| line.strip_prefix(PACKAGE_PREFIX))
        {
            flush(&mut current, &mut outcome);
            let token = rest.split(" (--").next().unwrap_or(rest).trim_end_matches(':');
            current = Some((FailedUnit::parse(token), Vec::new()));
        } else if let Some(rest) = line.strip_prefix(GLOBAL_PREFIX) {
            flush(&mut current, &mut outcome);
            outcome.errors.push(rest.trim().to_string());
        } else if line.starts_with(' ') {
            if let Some((_, lines)) = current.as_mut() {
                lines.push(line.trim().to_string());
            }
        } else {
            flush(&mut current, &mut outcome);
        }
    }
    flush(&mut current, &mut outcome);

    for unit in summary_units {
        if outcome.failure_for(&unit).is_none() {
            outcome.failures.push(UnitFailure {
                unit,
                kind: FailureKind::Unrecognized,
                message: String::new(),
            });
        }
    }
    outcome
}

/// Flatten a `Depends`/`Pre-Depends` field into package names
///
/// Alternatives are all kept, version constraints and `:any` qualifiers dropped.
#[must_use]
pub fn parse_depends(field: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for alt in field.split([',', '|']) {
        let name = alt
            .trim()
            .split(|c: char| c.is_whitespace() || c == '(' || c == '[' || c == '<')
            .next()
            .unwrap_or_default();
        let name = name.split_once(':').map_or(name, |(n, _)| n);
        if !name.is_empty() && seen.insert(name.to_string()) {
            out.push(name.to_string());
        }
    }
    out
}

/// Parse `dpkg-query -W -f INSTALLED_FORMAT` output
///
/// # Errors
///
/// Returns `PackageError::ParseError` for a record with missing fields.
pub fn parse_installed(output: &str) -> Result<Vec<InstalledPackage>, PackageError> {
    let mut packages = Vec::new();
    for line in output.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 7 {
            return Err(PackageError::ParseError {
                what: "dpkg-query record".to_string(),
                message: format!("expected 7 fields, got {}: {line}", fields.len()),
            });
        }
        let mut depends = parse_depends(fields[5]);
        for dep in parse_depends(fields[6]) {
            if !depends.contains(&dep) {
                depends.push(dep);
            }
        }
        packages.push(InstalledPackage {
            name: fields[0].to_string(),
            arch: Arch::new(fields[1]),
            version: fields[2].to_string(),
            priority: Priority::from_field(fields[3]),
            depends,
            status: PackageStatus::from_field(fields[4]),
        });
    }
    Ok(packages)
}

/// Parse `dpkg-query -S` output into `(owner, path)` pairs
///
/// A path shared by several packages yields one pair per owner. Diversion
/// lines are skipped.
#[must_use]
pub fn parse_owners(output: &str) -> Vec<(String, PathBuf)> {
    let mut owners = Vec::new();
    for line in output.lines() {
        if line.starts_with("diversion by ") {
            continue;
        }
        let Some((names, path)) = line.split_once(": ") else {
            continue;
        };
        for name in names.split(", ").map(str::trim).filter(|n| !n.is_empty()) {
            owners.push((name.to_string(), PathBuf::from(path.trim())));
        }
    }
    owners
}

/// Candidate version from `apt-cache policy`; `None` when nothing is installable
#[must_use]
pub fn parse_policy_candidate(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|l| l.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .find(|v| !v.is_empty())
        .filter(|v| *v != "(none)")
        .map(str::to_string)
}

/// Names from `apt-mark showauto`, architecture qualifiers stripped
#[must_use]
pub fn parse_auto_marks(output: &str) -> BTreeSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.split_once(':').map_or(l, |(n, _)| n).to_string())
        .collect()
}

/// Whitespace/newline separated architecture list
#[must_use]
pub fn parse_arch_list(output: &str) -> Vec<Arch> {
    output.split_whitespace().map(Arch::new).collect()
}
