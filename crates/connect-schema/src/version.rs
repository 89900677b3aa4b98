//! Version normalization for legacy channel releases.
//!
//! Channels publish versions in whatever shape the package author typed:
//! `1.2.3`, `1.2.3.4`, `1.6.0.0.1-beta2`, `v2.0`. The resolver needs one
//! canonical, totally ordered rendering, so every raw version goes through
//! two passes:
//!
//! 1. the legacy pass truncates four-or-more component versions to
//!    `MAJOR.MINOR.PATCH` and re-tags them with their stability, and
//! 2. the generic pass pads to four numeric components and canonicalizes the
//!    stability modifier (`1.2-b2` becomes `1.2.0.0-beta2`).
//!
//! Two raw versions that only differ in trailing patch noise collapse into the
//! same [`NormalizedVersion`]; [`dedup_by_normalized`] keeps the greater raw
//! version of each collision according to [`compare_raw`].

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::types::Stability;

static LEGACY_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<version>\d+\.\d+\.\d+)(?P<plevel>(?:\.\d+)+)(?:-(?P<stability>(?:alpha|beta|dev|rc)\d*))?$",
    )
    .expect("legacy version pattern is valid")
});

static GENERIC_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^v?(\d{1,5})(?:\.(\d+))?(?:\.(\d+))?(?:\.(\d+))?(?:[._-]?(stable|beta|b|rc|alpha|a|patch|pl|p)(?:[.-]?(\d+))?)?(?:[.-]?(dev))?$",
    )
    .expect("generic version pattern is valid")
});

static BRANCH_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^dev-(\S+)$").expect("branch version pattern is valid"));

/// Errors raised while normalizing a version string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The string matches no known legacy shape and is not a well-formed version.
    #[error("Invalid version format: '{0}'")]
    InvalidFormat(String),
}

/// Pre-release stage of a numeric version, least stable first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum Stage {
    Dev,
    Alpha,
    Beta,
    Rc,
    Stable,
    Patch,
}

impl Stage {
    fn from_modifier(modifier: &str) -> Self {
        match modifier.to_ascii_lowercase().as_str() {
            "alpha" | "a" => Self::Alpha,
            "beta" | "b" => Self::Beta,
            "rc" => Self::Rc,
            "patch" | "pl" | "p" => Self::Patch,
            _ => Self::Stable,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Alpha => "alpha",
            Self::Beta => "beta",
            Self::Rc => "RC",
            Self::Stable => "",
            Self::Patch => "patch",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
enum SortKey {
    // Branch versions sort below every numeric version.
    Branch(String),
    Numeric {
        parts: [u64; 4],
        stage: Stage,
        stage_number: Option<u64>,
        released: bool,
    },
}

/// A canonical, resolver-comparable version (`1.2.3.0`, `1.2.3.0-beta2`, `dev-master`).
///
/// Equality and hashing use the canonical text; ordering compares numeric
/// components first, then the stability stage, then the stage number.
#[derive(Debug, Clone)]
pub struct NormalizedVersion {
    text: String,
    key: SortKey,
}

impl NormalizedVersion {
    /// Parse a version that is either already canonical or in any accepted raw shape.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidFormat`] if the string cannot be classified.
    pub fn parse(s: &str) -> Result<Self, VersionError> {
        normalize(s, Stability::Unknown)
    }

    /// Return the canonical text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Stability implied by the version's modifier.
    pub fn stability(&self) -> Stability {
        match &self.key {
            SortKey::Branch(_) => Stability::Dev,
            SortKey::Numeric {
                stage, released, ..
            } => {
                if !released {
                    return Stability::Dev;
                }
                match stage {
                    Stage::Dev => Stability::Dev,
                    Stage::Alpha => Stability::Alpha,
                    Stage::Beta => Stability::Beta,
                    Stage::Rc => Stability::Rc,
                    Stage::Stable | Stage::Patch => Stability::Stable,
                }
            }
        }
    }

    /// Whether this is a `dev-<branch>` version.
    pub fn is_branch(&self) -> bool {
        matches!(self.key, SortKey::Branch(_))
    }
}

impl PartialEq for NormalizedVersion {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for NormalizedVersion {}

impl std::hash::Hash for NormalizedVersion {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.text.hash(state);
    }
}

impl Ord for NormalizedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl PartialOrd for NormalizedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for NormalizedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

impl AsRef<str> for NormalizedVersion {
    fn as_ref(&self) -> &str {
        &self.text
    }
}

impl std::str::FromStr for NormalizedVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for NormalizedVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// Normalize a raw channel version, using `stability` to tag legacy versions
/// that carry no stability suffix of their own.
///
/// ```
/// use connect_schema::Stability;
/// use connect_schema::version::normalize;
///
/// assert_eq!(normalize("1.2.3.1", Stability::Stable).unwrap().as_str(), "1.2.3.0");
/// assert_eq!(normalize("1.2.3.1", Stability::Beta).unwrap().as_str(), "1.2.3.0-beta");
/// assert_eq!(normalize("2.1", Stability::Stable).unwrap().as_str(), "2.1.0.0");
/// ```
///
/// # Errors
///
/// Returns [`VersionError::InvalidFormat`] if the string matches neither the
/// legacy shape nor the generic version grammar.
pub fn normalize(raw: &str, stability: Stability) -> Result<NormalizedVersion, VersionError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(VersionError::InvalidFormat(raw.to_string()));
    }

    let candidate = sanitize_legacy(raw, stability);
    parse_generic(&candidate).ok_or_else(|| VersionError::InvalidFormat(raw.to_string()))
}

/// Apply the legacy pass only: `1.6.0.0.1` becomes `1.6.0` plus a stability tag.
///
/// Strings that do not have the legacy shape are returned unchanged.
pub fn sanitize_legacy(raw: &str, stability: Stability) -> Cow<'_, str> {
    let Some(caps) = LEGACY_VERSION.captures(raw) else {
        return Cow::Borrowed(raw);
    };

    let version = &caps["version"];
    let tag = caps
        .name("stability")
        .map(|m| m.as_str())
        .or_else(|| stability.tag());

    match tag {
        Some(tag) => Cow::Owned(format!("{version}-{tag}")),
        None => Cow::Owned(version.to_string()),
    }
}

fn parse_generic(s: &str) -> Option<NormalizedVersion> {
    if let Some(caps) = BRANCH_VERSION.captures(s) {
        let text = format!("dev-{}", &caps[1]);
        return Some(NormalizedVersion {
            key: SortKey::Branch(text.clone()),
            text,
        });
    }

    let caps = GENERIC_VERSION.captures(s)?;

    let mut parts = [0u64; 4];
    for (slot, part) in parts.iter_mut().enumerate() {
        if let Some(m) = caps.get(slot + 1) {
            *part = m.as_str().parse().ok()?;
        }
    }

    let modifier = caps.get(5).map(|m| m.as_str());
    let mut stage = modifier.map_or(Stage::Stable, Stage::from_modifier);
    let number = if stage == Stage::Stable {
        None
    } else {
        caps.get(6).map(|m| m.as_str())
    };
    let stage_number = match number {
        Some(digits) => Some(digits.parse().ok()?),
        None => None,
    };

    let has_dev = caps.get(7).is_some();
    let mut released = !has_dev;
    if has_dev && stage == Stage::Stable {
        stage = Stage::Dev;
        released = true;
    }

    let mut text = format!("{}.{}.{}.{}", parts[0], parts[1], parts[2], parts[3]);
    if stage != Stage::Stable {
        text.push('-');
        text.push_str(stage.label());
        if let Some(digits) = number {
            text.push_str(digits);
        }
    }
    if !released {
        text.push_str("-dev");
    }

    Some(NormalizedVersion {
        text,
        key: SortKey::Numeric {
            parts,
            stage,
            stage_number,
            released,
        },
    })
}

/// Rank of the special words understood by [`compare_raw`]. A number ranks as `#`.
const NUMBER_RANK: i8 = 4;
const SPECIAL_FORMS: [(&str, i8); 10] = [
    ("dev", 0),
    ("alpha", 1),
    ("a", 1),
    ("beta", 2),
    ("b", 2),
    ("RC", 3),
    ("rc", 3),
    ("#", NUMBER_RANK),
    ("pl", 5),
    ("p", 5),
];

#[derive(Debug, Clone, Copy)]
enum RawPart<'a> {
    Number(&'a str),
    Word(&'a str),
}

fn special_rank(word: &str) -> i8 {
    SPECIAL_FORMS
        .iter()
        .find(|(form, _)| word.starts_with(form))
        .map_or(-6, |(_, rank)| *rank)
}

fn split_raw(s: &str) -> Vec<RawPart<'_>> {
    let mut parts = Vec::new();
    let mut start: Option<(usize, bool)> = None;

    for (i, c) in s.char_indices() {
        let separator = matches!(c, '.' | '-' | '_' | '+');
        let digit = c.is_ascii_digit();

        if let Some((begin, was_digit)) = start {
            if separator || was_digit != digit {
                parts.push(raw_part(&s[begin..i], was_digit));
                start = None;
            }
        }
        if !separator && start.is_none() {
            start = Some((i, digit));
        }
    }
    if let Some((begin, was_digit)) = start {
        parts.push(raw_part(&s[begin..], was_digit));
    }

    parts
}

fn raw_part(s: &str, digit: bool) -> RawPart<'_> {
    if digit {
        RawPart::Number(s)
    } else {
        RawPart::Word(s)
    }
}

fn compare_numbers(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_parts(a: RawPart<'_>, b: RawPart<'_>) -> Ordering {
    match (a, b) {
        (RawPart::Number(x), RawPart::Number(y)) => compare_numbers(x, y),
        (RawPart::Number(_), RawPart::Word(y)) => NUMBER_RANK.cmp(&special_rank(y)),
        (RawPart::Word(x), RawPart::Number(_)) => special_rank(x).cmp(&NUMBER_RANK),
        (RawPart::Word(x), RawPart::Word(y)) => special_rank(x).cmp(&special_rank(y)),
    }
}

fn compare_trailing(part: RawPart<'_>) -> Ordering {
    match part {
        RawPart::Number(_) => Ordering::Greater,
        RawPart::Word(w) => special_rank(w).cmp(&NUMBER_RANK),
    }
}

/// Compare two raw version strings with the usual "string/number" rules:
/// runs of digits compare numerically, words compare by their special rank
/// (`dev < alpha < beta < RC < number < pl`), a trailing number makes a
/// version greater and a trailing pre-release word makes it smaller.
///
/// ```
/// use std::cmp::Ordering;
/// use connect_schema::version::compare_raw;
///
/// assert_eq!(compare_raw("1.2.3.1", "1.2.3.0"), Ordering::Greater);
/// assert_eq!(compare_raw("1.0rc1", "1.0"), Ordering::Less);
/// ```
pub fn compare_raw(a: &str, b: &str) -> Ordering {
    let left = split_raw(a);
    let right = split_raw(b);

    for i in 0.. {
        match (left.get(i), right.get(i)) {
            (Some(&x), Some(&y)) => {
                let ord = compare_parts(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(&x), None) => return compare_trailing(x),
            (None, Some(&y)) => return compare_trailing(y).reverse(),
            (None, None) => break,
        }
    }

    Ordering::Equal
}

/// Collapse entries that normalize to the same version, keeping the one whose
/// raw version is greater under [`compare_raw`]. On a tie the first entry wins.
pub fn dedup_by_normalized<T>(
    entries: impl IntoIterator<Item = (NormalizedVersion, T)>,
    raw: impl Fn(&T) -> &str,
) -> BTreeMap<NormalizedVersion, T> {
    let mut out = BTreeMap::new();

    for (version, entry) in entries {
        match out.entry(version) {
            Entry::Vacant(slot) => {
                slot.insert(entry);
            }
            Entry::Occupied(mut slot) => {
                if compare_raw(raw(&entry), raw(slot.get())) == Ordering::Greater {
                    slot.insert(entry);
                }
            }
        }
    }

    out
}
