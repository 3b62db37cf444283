//! Content fingerprints
//!
//! A [`Fingerprint`] condenses everything a tool reported about a document
//! into one digest per role, so two runs can be compared later without
//! running the tools again. Renders are digested with a perceptual hash per
//! selected page, text with an MD5 per page, and the remaining roles with a
//! single MD5 over a canonical, order-independent rendition of the
//! observation.

use crate::capability::{Capability, ToolSession, TraceMessage};
use crate::compare::metrics::phash;
use crate::error::{BenchError, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Which rendered pages contribute to a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PageSelection {
    #[default]
    All,
    First(usize),
    /// A reproducible sample: the same seed always picks the same pages
    Random { count: usize, seed: u64 },
}

impl PageSelection {
    /// Pick from the available page indices, returned in ascending order
    pub fn select(&self, available: &[usize]) -> Vec<usize> {
        let mut pages = available.to_vec();
        pages.sort_unstable();
        pages.dedup();
        match *self {
            PageSelection::All => pages,
            PageSelection::First(n) => pages.into_iter().take(n).collect(),
            PageSelection::Random { count, seed } => {
                if count >= pages.len() {
                    return pages;
                }
                let mut rng = StdRng::seed_from_u64(seed);
                let mut picked: Vec<usize> = rand::seq::index::sample(&mut rng, pages.len(), count)
                    .into_iter()
                    .map(|i| pages[i])
                    .collect();
                picked.sort_unstable();
                picked
            }
        }
    }
}

impl fmt::Display for PageSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSelection::All => write!(f, "all"),
            PageSelection::First(n) => write!(f, "first-{n}"),
            PageSelection::Random { count, seed } => write!(f, "random-{count},{seed}"),
        }
    }
}

impl FromStr for PageSelection {
    type Err = BenchError;

    /// `all`, `first-N`, `random-N` or `random-N,SEED`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            BenchError::Config(format!(
                "invalid page selection '{s}' (expected all, first-N or random-N[,seed])"
            ))
        };
        let count = |n: &str| match n.trim().parse::<usize>() {
            Ok(0) | Err(_) => Err(invalid()),
            Ok(n) => Ok(n),
        };

        let s_trimmed = s.trim();
        if s_trimmed.eq_ignore_ascii_case("all") {
            Ok(PageSelection::All)
        } else if let Some(n) = s_trimmed.strip_prefix("first-") {
            Ok(PageSelection::First(count(n)?))
        } else if let Some(rest) = s_trimmed.strip_prefix("random-") {
            let (n, seed) = match rest.split_once(',') {
                Some((n, seed)) => (n, seed.trim().parse::<u64>().map_err(|_| invalid())?),
                None => (rest, 0),
            };
            Ok(PageSelection::Random {
                count: count(n)?,
                seed,
            })
        } else {
            Err(invalid())
        }
    }
}

impl TryFrom<String> for PageSelection {
    type Error = BenchError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<PageSelection> for String {
    fn from(selection: PageSelection) -> Self {
        selection.to_string()
    }
}

/// Digest of one role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Digest {
    /// The role failed or is unavailable
    Empty,
    /// One digest per page index
    Paged(BTreeMap<usize, String>),
    Single(String),
}

impl Digest {
    pub fn is_empty(&self) -> bool {
        matches!(self, Digest::Empty)
    }
}

/// Digests of one tool run over one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub document: String,
    pub tool: String,
    /// Distinguishes repeated runs of the same tool
    pub run: usize,
    pub digests: BTreeMap<Capability, Digest>,
}

impl Fingerprint {
    pub fn digest(&self, capability: Capability) -> &Digest {
        self.digests.get(&capability).unwrap_or(&Digest::Empty)
    }

    /// Roles whose digests differ; a role absent on one side counts as empty
    pub fn differing_roles(&self, other: &Fingerprint) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|&cap| {
                self.digests.contains_key(&cap) || other.digests.contains_key(&cap)
            })
            .filter(|&cap| self.digest(cap) != other.digest(cap))
            .collect()
    }

    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.differing_roles(other).is_empty()
    }

    fn key(&self) -> (String, String, usize) {
        (self.document.clone(), self.tool.clone(), self.run)
    }
}

/// MD5 of a string, as lowercase hex
pub fn md5_hex(data: &str) -> String {
    format!("{:x}", md5::compute(data.as_bytes()))
}

/// Order-independent string form of a JSON tree
///
/// Object keys are sorted and array elements are sorted by their own
/// canonical form, so two trees that differ only in ordering canonicalize
/// identically.
pub fn canonicalize(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, String)> = map
                .iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            entries.sort();
            let body: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{v}", Value::String(k)))
                .collect();
            format!("{{{}}}", body.join(","))
        }
        Value::Array(items) => {
            let mut body: Vec<String> = items.iter().map(canonicalize).collect();
            body.sort();
            format!("[{}]", body.join(","))
        }
        other => other.to_string(),
    }
}

/// Sorted, newline-joined list
pub fn canonical_list<S: AsRef<str>>(items: &[S]) -> String {
    let mut sorted: Vec<&str> = items.iter().map(|s| s.as_ref()).collect();
    sorted.sort_unstable();
    sorted.join("\n")
}

fn trace_digest(messages: &[TraceMessage]) -> Digest {
    let lines: Vec<String> = messages.iter().map(|m| m.to_string()).collect();
    Digest::Single(md5_hex(&canonical_list(&lines)))
}

fn role_digest(session: &mut ToolSession, capability: Capability, pages: &PageSelection) -> Digest {
    let digest = match capability {
        Capability::Trace => session.trace_messages().map(trace_digest),
        Capability::Render => session.renders().map(|renders| {
            let available: Vec<usize> = renders.keys().copied().collect();
            let paged: BTreeMap<usize, String> = pages
                .select(&available)
                .into_iter()
                .filter_map(|index| renders.get(&index).map(|page| (index, page)))
                .map(|(index, page)| {
                    let hash = match &page.image {
                        Some(image) => phash(image)
                            .map(|h| format!("{h:016x}"))
                            .unwrap_or_else(|e| format!("failed: {e}")),
                        None => format!("failed: {}", page.outcome),
                    };
                    (index, hash)
                })
                .collect();
            if paged.is_empty() {
                Digest::Empty
            } else {
                Digest::Paged(paged)
            }
        }),
        Capability::ExtractText => session.text().map(|text| {
            if text.is_empty() {
                Digest::Empty
            } else {
                Digest::Paged(text.iter().map(|(i, t)| (*i, md5_hex(t))).collect())
            }
        }),
        Capability::ExtractMetadata => session
            .metadata()
            .map(|meta| Digest::Single(md5_hex(&canonicalize(meta)))),
        Capability::ExtractFonts => session
            .fonts()
            .map(|fonts| Digest::Single(md5_hex(&canonical_list(fonts)))),
        Capability::ExtractImageData => session
            .image_data()
            .map(|images| Digest::Single(md5_hex(&canonical_list(images)))),
        Capability::Reforge => return Digest::Empty,
    };
    digest.unwrap_or_else(|error| {
        debug!(tool = session.name(), %capability, %error, "role fingerprints as empty");
        Digest::Empty
    })
}

/// Fingerprint every non-reforge role the session's tool supports
pub fn fingerprint(session: &mut ToolSession, pages: &PageSelection, run: usize) -> Fingerprint {
    let roles: Vec<Capability> = session
        .capabilities()
        .roles()
        .filter(|&cap| cap != Capability::Reforge)
        .collect();
    let digests = roles
        .into_iter()
        .map(|cap| (cap, role_digest(session, cap, pages)))
        .collect();
    Fingerprint {
        document: session.document().identity(),
        tool: session.name().to_string(),
        run,
        digests,
    }
}

type PairKey = ((String, String, usize), (String, String, usize));

/// Compares fingerprints, computing each unordered pair once
#[derive(Debug, Default)]
pub struct FingerprintComparator {
    cache: HashMap<PairKey, Vec<Capability>>,
}

impl FingerprintComparator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roles on which the two fingerprints disagree
    pub fn differing_roles(&mut self, a: &Fingerprint, b: &Fingerprint) -> Vec<Capability> {
        let (ka, kb) = (a.key(), b.key());
        let key = if ka <= kb { (ka, kb) } else { (kb, ka) };
        self.cache
            .entry(key)
            .or_insert_with(|| a.differing_roles(b))
            .clone()
    }

    pub fn equal(&mut self, a: &Fingerprint, b: &Fingerprint) -> bool {
        self.differing_roles(a, b).is_empty()
    }

    /// Number of distinct pairs compared so far
    pub fn cached_pairs(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{CapabilitySet, ToolOptions};
    use crate::document::DocumentHandle;
    use crate::tools::MockTool;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn session(tool: &MockTool, data: &[u8]) -> ToolSession {
        ToolSession::open(
            tool,
            DocumentHandle::from_bytes("doc.pdf", data.to_vec()),
            ToolOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_page_selection_parsing() {
        assert_eq!("all".parse::<PageSelection>().unwrap(), PageSelection::All);
        assert_eq!("first-3".parse::<PageSelection>().unwrap(), PageSelection::First(3));
        assert_eq!(
            "random-2,42".parse::<PageSelection>().unwrap(),
            PageSelection::Random { count: 2, seed: 42 }
        );
        assert_eq!(
            "random-5".parse::<PageSelection>().unwrap(),
            PageSelection::Random { count: 5, seed: 0 }
        );
        for bad in ["", "first-0", "first-x", "random-", "random-2,x", "some"] {
            assert!(bad.parse::<PageSelection>().is_err(), "{bad}");
        }
        let selection = PageSelection::Random { count: 4, seed: 7 };
        assert_eq!(selection.to_string().parse::<PageSelection>().unwrap(), selection);
    }

    #[test]
    fn test_page_selection_is_reproducible() {
        let pages: Vec<usize> = (0..50).collect();
        let selection = PageSelection::Random { count: 5, seed: 99 };
        let first = selection.select(&pages);
        assert_eq!(first.len(), 5);
        assert_eq!(first, selection.select(&pages));
        assert!(first.windows(2).all(|w| w[0] < w[1]));

        assert_eq!(PageSelection::First(2).select(&[4, 1, 9]), vec![1, 4]);
        assert_eq!(PageSelection::First(10).select(&[2, 1]), vec![1, 2]);
        assert_eq!(
            PageSelection::Random { count: 10, seed: 1 }.select(&[0, 1]),
            vec![0, 1]
        );
    }

    #[test]
    fn test_page_selection_serde() {
        let json = serde_json::to_string(&PageSelection::First(2)).unwrap();
        assert_eq!(json, "\"first-2\"");
        let parsed: PageSelection = serde_json::from_str("\"random-3,5\"").unwrap();
        assert_eq!(parsed, PageSelection::Random { count: 3, seed: 5 });
        assert!(serde_json::from_str::<PageSelection>("\"every\"").is_err());
    }

    #[test]
    fn test_canonicalize_ignores_order() {
        let a = json!({"b": [3, 1, {"y": 1, "x": 2}], "a": "t"});
        let b = json!({"a": "t", "b": [{"x": 2, "y": 1}, 1, 3]});
        assert_eq!(canonicalize(&a), canonicalize(&b));
        assert_ne!(canonicalize(&a), canonicalize(&json!({"a": "t"})));
        assert_eq!(canonical_list(&["b", "a"]), "a\nb");
    }

    #[test]
    fn test_same_tool_same_document_fingerprints_match() {
        let tool = MockTool::validator("alpha").with_pages(3);
        let a = fingerprint(&mut session(&tool, b"%PDF-1.7 body"), &PageSelection::All, 0);
        let b = fingerprint(&mut session(&tool, b"%PDF-1.7 body"), &PageSelection::All, 1);
        assert!(a.matches(&b));
        match a.digest(Capability::Render) {
            Digest::Paged(pages) => assert_eq!(pages.len(), 3),
            other => panic!("unexpected digest {other:?}"),
        }
        assert!(!a.digests.contains_key(&Capability::Reforge));
    }

    #[test]
    fn test_failed_role_is_empty_and_unequal() {
        let tool = MockTool::new("alpha", CapabilitySet::RENDER | CapabilitySet::EXTRACT_FONTS);
        let broken = fingerprint(&mut session(&tool, b"%PDF %%BROKEN"), &PageSelection::All, 0);
        let fine = fingerprint(&mut session(&tool, b"%PDF fine"), &PageSelection::All, 0);

        assert!(broken.digest(Capability::Render).is_empty());
        assert!(broken.digest(Capability::ExtractFonts).is_empty());
        assert!(!fine.digest(Capability::Render).is_empty());
        assert_eq!(
            broken.differing_roles(&fine),
            vec![Capability::Render, Capability::ExtractFonts]
        );
        assert!(broken.matches(&broken.clone()));
    }

    #[test]
    fn test_comparator_caches_mirrored_pairs() {
        let tool = MockTool::validator("alpha");
        let a = fingerprint(&mut session(&tool, b"%PDF one"), &PageSelection::All, 0);
        let b = fingerprint(&mut session(&tool, b"%PDF two"), &PageSelection::All, 1);

        let mut comparator = FingerprintComparator::new();
        let forward = comparator.differing_roles(&a, &b);
        let backward = comparator.differing_roles(&b, &a);
        assert_eq!(forward, backward);
        assert_eq!(comparator.cached_pairs(), 1);
    }
}
