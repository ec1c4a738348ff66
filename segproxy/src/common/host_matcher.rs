use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobKind {
    /// No wildcard at all, e.g. `api.example.com`.
    Exact,
    /// Contains `*` but also literal text, e.g. `*.example.com`.
    Wildcard,
    /// Only `*`, matches every host.
    MatchAll,
}

/// Case-insensitive host pattern where `*` matches any (possibly empty) run of characters,
/// dots included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostGlob {
    pattern: String,
    kind: GlobKind,
    literal_labels: usize,
}

impl HostGlob {
    const EXACT_TIER: u32 = 100;
    const WILDCARD_TIER: u32 = 50;
    const MATCH_ALL_TIER: u32 = 1;
    // keeps any wildcard score below the exact tier
    const MAX_LABEL_BONUS: usize = 45;

    pub fn new(pattern: &str) -> Option<Self> {
        let pattern = pattern.trim().trim_end_matches('.').to_ascii_lowercase();
        if pattern.is_empty() || pattern.chars().any(|c| c.is_whitespace()) {
            return None;
        }
        let kind = if pattern.chars().all(|c| c == '*') {
            GlobKind::MatchAll
        } else if pattern.contains('*') {
            GlobKind::Wildcard
        } else {
            GlobKind::Exact
        };
        let literal_labels = pattern
            .split('.')
            .filter(|label| !label.is_empty() && !label.contains('*'))
            .count();
        Some(Self {
            pattern,
            kind,
            literal_labels,
        })
    }

    #[cfg(test)]
    pub fn kind(&self) -> GlobKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// Host part of the specificity score.
    pub fn specificity(&self) -> u32 {
        let tier = match self.kind {
            GlobKind::Exact => Self::EXACT_TIER,
            GlobKind::Wildcard => Self::WILDCARD_TIER,
            GlobKind::MatchAll => Self::MATCH_ALL_TIER,
        };
        tier + self.literal_labels.min(Self::MAX_LABEL_BONUS) as u32
    }

    /// `host` must already be normalized (lowercase, no trailing dot).
    pub fn matches(&self, host: &str) -> bool {
        match self.kind {
            GlobKind::MatchAll => true,
            GlobKind::Exact => self.pattern == host,
            GlobKind::Wildcard => wildcard_match(self.pattern.as_bytes(), host.as_bytes()),
        }
    }
}

impl Display for HostGlob {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.pattern.as_str())
    }
}

pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

// Greedy matcher with single-star backtracking; linear in practice for host names.
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

#[test]
fn test_glob() {
    let glob = HostGlob::new("*.Example.com.").unwrap();
    assert_eq!(glob.as_str(), "*.example.com");
    assert_eq!(glob.kind(), GlobKind::Wildcard);
    assert!(glob.matches("a.example.com"));
    assert!(glob.matches("a.b.example.com"));
    assert!(!glob.matches("example.com"));
    assert!(!glob.matches("notexample.com"));
    assert!(!glob.matches("a.example.com.evil"));

    let glob = HostGlob::new("api-*.example.com").unwrap();
    assert!(glob.matches("api-eu.example.com"));
    assert!(glob.matches("api-.example.com"));
    assert!(!glob.matches("web.example.com"));

    let glob = HostGlob::new("tracker.example.com").unwrap();
    assert_eq!(glob.kind(), GlobKind::Exact);
    assert!(glob.matches("tracker.example.com"));
    assert!(!glob.matches("x.tracker.example.com"));

    assert!(HostGlob::new("*").unwrap().matches("anything.at.all"));
    assert!(HostGlob::new("").is_none());
    assert!(HostGlob::new("a b").is_none());
}

#[test]
fn test_specificity_tiers() {
    let exact = HostGlob::new("example.com").unwrap().specificity();
    let deep_wildcard = HostGlob::new("*.a.b.c.d.example.com").unwrap().specificity();
    let wildcard = HostGlob::new("*.example.com").unwrap().specificity();
    let all = HostGlob::new("*").unwrap().specificity();
    assert_eq!(exact, 102);
    assert_eq!(wildcard, 52);
    assert_eq!(all, 1);
    assert!(exact > deep_wildcard);
    assert!(deep_wildcard > wildcard);
    assert!(wildcard > all);
    assert_eq!(normalize_host("API.Example.COM."), "api.example.com");
}
