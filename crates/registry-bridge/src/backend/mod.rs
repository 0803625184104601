//! Registry client implementations and the version rules they share

pub mod memory;

pub use memory::MemoryRegistry;

use std::cmp::Ordering;

/// A dotted numeric version such as `1.0.0` or `2.1.0.3`
///
/// Up to four segments are significant; missing segments count as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version([u32; 4]);

impl Version {
    /// Parse a version, returning `None` for anything non-numeric
    pub fn parse(text: &str) -> Option<Self> {
        let mut segments = [0u32; 4];
        let mut count = 0;
        for part in text.trim().split('.') {
            if count == segments.len() {
                return None;
            }
            segments[count] = part.parse().ok()?;
            count += 1;
        }
        Some(Self(segments))
    }
}

/// How a lookup selects among registered versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRule {
    /// Only the highest registered version
    Latest,
    /// Exactly this version
    Exact(Version),
    /// This version or newer (`1.0.0+`)
    AtLeast(Version),
    /// From the first version up to, but excluding, the second (`1.0.0-2.0.0`)
    Range(Version, Version),
}

impl VersionRule {
    /// Parse a rule; an empty rule means `latest`
    pub fn parse(rule: &str) -> Option<Self> {
        let rule = rule.trim();
        if rule.is_empty() || rule.eq_ignore_ascii_case("latest") {
            return Some(Self::Latest);
        }
        if let Some(base) = rule.strip_suffix('+') {
            return Version::parse(base).map(Self::AtLeast);
        }
        if let Some((low, high)) = rule.split_once('-') {
            return Some(Self::Range(Version::parse(low)?, Version::parse(high)?));
        }
        Version::parse(rule).map(Self::Exact)
    }

    /// Select the matching versions out of the registered ones
    pub fn select<'a>(&self, versions: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        let parsed: Vec<(&str, Version)> = versions
            .into_iter()
            .filter_map(|v| Version::parse(v).map(|parsed| (v, parsed)))
            .collect();

        match self {
            Self::Latest => {
                let newest = parsed.iter().map(|(_, v)| *v).max();
                parsed
                    .into_iter()
                    .filter(|(_, v)| Some(*v) == newest)
                    .map(|(raw, _)| raw)
                    .collect()
            }
            Self::Exact(wanted) => parsed
                .into_iter()
                .filter(|(_, v)| v == wanted)
                .map(|(raw, _)| raw)
                .collect(),
            Self::AtLeast(base) => parsed
                .into_iter()
                .filter(|(_, v)| v.cmp(base) != Ordering::Less)
                .map(|(raw, _)| raw)
                .collect(),
            Self::Range(low, high) => parsed
                .into_iter()
                .filter(|(_, v)| v >= low && v < high)
                .map(|(raw, _)| raw)
                .collect(),
        }
    }
}
