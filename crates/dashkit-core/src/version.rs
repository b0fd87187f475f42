//! Version Resolution - pick a compiler version for a semver range
//!
//! Ranges use npm syntax (`>=1.0.0 <2.0.0`, `1.0.0 - 1.5.0`,
//! `^1.0.0 || ^2.0.0`, `1.x`). Each `||` alternative becomes one
//! `semver::VersionReq`.

use anyhow::Result;
use async_trait::async_trait;
use semver::{Version, VersionReq};
use tracing::{info, warn};

use std::fmt;

use crate::error::DashError;

/// Where installed and published versions come from
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Versions present in the local binary directory
    async fn installed_versions(&self) -> Result<Vec<String>>;

    /// Versions published on the release feed
    async fn published_versions(&self) -> Result<Vec<String>>;
}

/// What to do to obtain a usable compiler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPlan {
    /// Already installed and up to date
    UseInstalled(Version),
    /// Nothing installed matches; install this one
    Install(Version),
    /// Installed, but a newer matching release exists
    Upgrade { from: Version, to: Version },
}

impl VersionPlan {
    /// The version that will be used after the plan runs
    pub fn target(&self) -> &Version {
        match self {
            VersionPlan::UseInstalled(v) | VersionPlan::Install(v) => v,
            VersionPlan::Upgrade { to, .. } => to,
        }
    }
}

/// An npm-style range: any alternative may match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse a version range such as `^1.2.0` or `>=1.0.0 <2.0.0 || 3.x`
pub fn parse_range(range: &str) -> Result<VersionRange, DashError> {
    let alternatives = range
        .split("||")
        .map(|set| {
            let translated = comparator_set(set);
            VersionReq::parse(&translated).map_err(|e| {
                DashError::InvalidProjectConfig(format!("invalid version range {range}: {e}"))
            })
        })
        .collect::<Result<_, _>>()?;

    Ok(VersionRange {
        source: range.trim().to_string(),
        alternatives,
    })
}

/// Rewrite one npm comparator set in `semver::VersionReq` syntax
fn comparator_set(set: &str) -> String {
    let set = set.trim();
    if let Some((low, high)) = set.split_once(" - ") {
        return format!(
            ">={}, <={}",
            strip_v(low.trim()),
            strip_v(high.trim())
        );
    }

    let mut comparators = Vec::new();
    let mut pending_op = String::new();
    for token in set.split_whitespace() {
        let token = token.trim_end_matches(',');
        let split = token
            .find(|c: char| !matches!(c, '<' | '>' | '=' | '^' | '~'))
            .unwrap_or(token.len());
        let (op, version) = token.split_at(split);
        pending_op.push_str(op);
        if version.is_empty() {
            // `>= 1.0.0`: operator and version are separate tokens
            continue;
        }

        let op = std::mem::take(&mut pending_op);
        let version = strip_v(version);
        let comparator = if !op.is_empty() {
            format!("{op}{version}")
        } else if matches!(version, "x" | "X" | "*") {
            "*".to_string()
        } else if is_wildcard(version) {
            version.to_string()
        } else {
            // A bare npm version is exact (or a partial-version range)
            format!("={version}")
        };
        comparators.push(comparator);
    }

    if comparators.is_empty() {
        "*".to_string()
    } else {
        comparators.join(", ")
    }
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix(['v', 'V']).unwrap_or(version)
}

fn is_wildcard(version: &str) -> bool {
    version.split('.').any(|part| matches!(part, "x" | "X" | "*"))
}

/// Greatest version satisfying `range`; unparseable strings are skipped
pub fn max_satisfying<S: AsRef<str>>(versions: &[S], range: &VersionRange) -> Option<Version> {
    versions
        .iter()
        .filter_map(|v| Version::parse(v.as_ref().trim_start_matches('v')).ok())
        .filter(|v| range.matches(v))
        .max()
}

/// Decide which compiler version to use.
///
/// The release feed is only consulted when nothing installed matches or
/// when `auto_update` is set. A feed failure during auto-update keeps the
/// installed version.
pub async fn resolve_version(
    range: &VersionRange,
    auto_update: bool,
    source: &dyn VersionSource,
) -> Result<VersionPlan> {
    let installed = source.installed_versions().await?;

    let Some(current) = max_satisfying(&installed, range) else {
        let published = source
            .published_versions()
            .await
            .map_err(|e| DashError::VersionFeed(format!("{e:#}")))?;
        return match max_satisfying(&published, range) {
            Some(version) => Ok(VersionPlan::Install(version)),
            None => Err(DashError::NoMatchingVersion(range.to_string()).into()),
        };
    };

    if auto_update {
        match source.published_versions().await {
            Ok(published) => {
                if let Some(newest) = max_satisfying(&published, range) {
                    if newest > current {
                        info!("Found newer dash version {}.", newest);
                        return Ok(VersionPlan::Upgrade {
                            from: current,
                            to: newest,
                        });
                    }
                }
            }
            Err(e) => warn!("Failed to check for dash updates: {:#}", e),
        }
    }

    Ok(VersionPlan::UseInstalled(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        installed: Vec<&'static str>,
        published: Option<Vec<&'static str>>,
        feed_calls: AtomicUsize,
    }

    impl FakeSource {
        fn new(installed: Vec<&'static str>, published: Option<Vec<&'static str>>) -> Self {
            Self {
                installed,
                published,
                feed_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl VersionSource for FakeSource {
        async fn installed_versions(&self) -> Result<Vec<String>> {
            Ok(self.installed.iter().map(|s| s.to_string()).collect())
        }

        async fn published_versions(&self) -> Result<Vec<String>> {
            self.feed_calls.fetch_add(1, Ordering::SeqCst);
            self.published
                .as_ref()
                .map(|v| v.iter().map(|s| s.to_string()).collect())
                .ok_or_else(|| anyhow!("feed down"))
        }
    }

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_prefers_installed_without_auto_update() {
        let source = FakeSource::new(vec!["1.2.3"], Some(vec!["1.2.3", "1.3.0"]));
        let range = parse_range("^1.2.0").unwrap();

        let plan = resolve_version(&range, false, &source).await.unwrap();

        assert_eq!(plan, VersionPlan::UseInstalled(v("1.2.3")));
        assert_eq!(source.feed_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_auto_update_upgrades_to_newer() {
        let source = FakeSource::new(vec!["1.2.3"], Some(vec!["1.2.3", "1.3.0", "2.0.0"]));
        let range = parse_range("^1.2.0").unwrap();

        let plan = resolve_version(&range, true, &source).await.unwrap();

        assert_eq!(plan, VersionPlan::Upgrade { from: v("1.2.3"), to: v("1.3.0") });
        assert_eq!(plan.target(), &v("1.3.0"));
    }

    #[tokio::test]
    async fn test_auto_update_keeps_installed_when_current() {
        let source = FakeSource::new(vec!["1.3.0"], Some(vec!["1.2.0", "1.3.0"]));
        let range = parse_range("^1.2.0").unwrap();

        let plan = resolve_version(&range, true, &source).await.unwrap();
        assert_eq!(plan, VersionPlan::UseInstalled(v("1.3.0")));
    }

    #[tokio::test]
    async fn test_auto_update_tolerates_feed_failure() {
        let source = FakeSource::new(vec!["1.2.3"], None);
        let range = parse_range("^1.0.0").unwrap();

        let plan = resolve_version(&range, true, &source).await.unwrap();
        assert_eq!(plan, VersionPlan::UseInstalled(v("1.2.3")));
    }

    #[tokio::test]
    async fn test_installs_when_nothing_installed_matches() {
        let source = FakeSource::new(vec!["0.9.0"], Some(vec!["1.0.0", "1.1.5", "2.0.0"]));
        let range = parse_range("^1.0.0").unwrap();

        let plan = resolve_version(&range, false, &source).await.unwrap();
        assert_eq!(plan, VersionPlan::Install(v("1.1.5")));
    }

    #[tokio::test]
    async fn test_no_match_is_fatal() {
        let source = FakeSource::new(vec![], Some(vec!["0.1.0"]));
        let range = parse_range("^3.0.0").unwrap();

        let err = resolve_version(&range, false, &source).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DashError>(),
            Some(DashError::NoMatchingVersion(_))
        ));
    }

    #[tokio::test]
    async fn test_feed_failure_without_install_is_fatal() {
        let source = FakeSource::new(vec![], None);
        let range = parse_range("*").unwrap();

        let err = resolve_version(&range, false, &source).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<DashError>(), Some(DashError::VersionFeed(_))));
    }

    #[test]
    fn test_max_satisfying_skips_garbage() {
        let range = parse_range(">=0.4.2").unwrap();
        let versions = ["0.4.1", "not-a-version", "v0.5.0", "0.4.2"];
        assert_eq!(max_satisfying(&versions, &range), Some(v("0.5.0")));
    }

    #[test]
    fn test_invalid_range() {
        assert!(parse_range("^^1").is_err());
        assert!(parse_range(">=1.0.0 || ~~2").is_err());
    }

    fn matching(range: &str, versions: &[&str]) -> Vec<String> {
        let range = parse_range(range).unwrap();
        versions
            .iter()
            .filter(|s| range.matches(&v(s)))
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_npm_range_forms() {
        let versions = ["0.9.0", "1.0.0", "1.2.0", "1.5.0", "1.5.3", "2.0.0", "2.4.1", "3.0.0"];

        assert_eq!(
            matching(">=1.0.0 <2.0.0", &versions),
            ["1.0.0", "1.2.0", "1.5.0", "1.5.3"]
        );
        assert_eq!(matching(">= 1.5.0 < 2", &versions), ["1.5.0", "1.5.3"]);
        assert_eq!(
            matching("^1.2.0 || ^2.0.0", &versions),
            ["1.2.0", "1.5.0", "1.5.3", "2.0.0", "2.4.1"]
        );
        assert_eq!(matching("1.0.0 - 1.5.0", &versions), ["1.0.0", "1.2.0", "1.5.0"]);
        assert_eq!(matching("1.0.0 - 1.5", &versions), ["1.0.0", "1.2.0", "1.5.0", "1.5.3"]);
        assert_eq!(matching("1.x", &versions), ["1.0.0", "1.2.0", "1.5.0", "1.5.3"]);
        assert_eq!(matching("1.5", &versions), ["1.5.0", "1.5.3"]);
        assert_eq!(matching("v2.4.1", &versions), ["2.4.1"]);
        assert_eq!(matching("", &versions).len(), versions.len());
        assert_eq!(matching("x", &versions).len(), versions.len());
    }

    #[test]
    fn test_range_display_keeps_source() {
        let range = parse_range(" >=1.0.0 <2.0.0 ").unwrap();
        assert_eq!(range.to_string(), ">=1.0.0 <2.0.0");
    }
}
