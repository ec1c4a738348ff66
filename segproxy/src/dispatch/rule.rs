use crate::common::host_matcher::HostGlob;
use crate::proxy::{NetworkAddr, RequestContext, Scheme};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Direct,
    SegmentUpstream,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Mode::Direct),
            "segment_upstream" => Ok(Mode::SegmentUpstream),
            s => Err(format!("unknown mode '{}'", s)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Direct => "direct",
            Mode::SegmentUpstream => "segment_upstream",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    Direct,
    Upstream(NetworkAddr),
    Block { reason: Option<String> },
}

impl RuleAction {
    pub fn name(&self) -> &'static str {
        match self {
            RuleAction::Direct => "direct",
            RuleAction::Upstream(_) => "upstream",
            RuleAction::Block { .. } => "block",
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, RuleAction::Block { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    None,
    Fixed { chunk: usize },
    Random { min: usize, max: usize },
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::None => "none",
            Strategy::Fixed { .. } => "fixed",
            Strategy::Random { .. } => "random",
        }
    }
}

/// How outbound client bytes are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segmentation {
    pub mode: Mode,
    pub strategy: Strategy,
    pub delay: Duration,
}

impl Default for Segmentation {
    fn default() -> Self {
        Self {
            mode: Mode::Direct,
            strategy: Strategy::None,
            delay: Duration::ZERO,
        }
    }
}

impl Segmentation {
    /// Strategy actually applied; `direct` mode never segments.
    pub fn effective(&self) -> Self {
        match self.mode {
            Mode::Direct => Self {
                mode: Mode::Direct,
                strategy: Strategy::None,
                delay: Duration::ZERO,
            },
            Mode::SegmentUpstream => *self,
        }
    }

    /// `strategy=<s>` followed by the parameters that strategy uses.
    pub fn describe(&self) -> String {
        let mut out = format!("strategy={}", self.strategy.name());
        match self.strategy {
            Strategy::None => return out,
            Strategy::Fixed { chunk } => out.push_str(&format!(" chunk={}", chunk)),
            Strategy::Random { min, max } => out.push_str(&format!(" min={} max={}", min, max)),
        }
        out.push_str(&format!(" delay={}", self.delay.as_millis()));
        out
    }
}

impl Display for Segmentation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "mode={} ", self.mode)?;
        match self.strategy {
            Strategy::None => write!(f, "strategy=none")?,
            Strategy::Fixed { chunk } => write!(f, "strategy=fixed chunk={}", chunk)?,
            Strategy::Random { min, max } => {
                write!(f, "strategy=random min={} max={}", min, max)?
            }
        }
        write!(f, " delay={}", self.delay.as_millis())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub host: HostGlob,
    pub action: RuleAction,
    pub segmentation: Segmentation,
    pub scheme: Option<Scheme>,
    pub method: Option<String>,
    pub path_prefix: Option<String>,
    pub source_order: usize,
}

impl Rule {
    /// Specificity if the rule applies to `ctx`, `None` when excluded.
    pub fn score(&self, ctx: &RequestContext) -> Option<u32> {
        if !self.host.matches(&ctx.host) {
            return None;
        }
        let mut score = self.host.specificity();
        if let Some(scheme) = self.scheme {
            if scheme != ctx.scheme {
                return None;
            }
            score += 1;
        }
        if let Some(method) = &self.method {
            if *method != ctx.method {
                return None;
            }
            score += 1;
        }
        if let Some(prefix) = &self.path_prefix {
            if !ctx.path.starts_with(prefix.as_str()) {
                return None;
            }
            score += 1;
        }
        Some(score)
    }
}

fn shorten(value: &str) -> String {
    const MAX_LEN: usize = 24;
    if value.chars().count() <= MAX_LEN {
        value.to_string()
    } else {
        let head: String = value.chars().take(MAX_LEN - 3).collect();
        format!("{}...", head)
    }
}

impl Display for Rule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "host={}", self.host)?;
        if let Some(scheme) = self.scheme {
            write!(f, " scheme={}", scheme)?;
        }
        if let Some(method) = &self.method {
            write!(f, " method={}", method)?;
        }
        if let Some(prefix) = &self.path_prefix {
            write!(f, " path={}", shorten(prefix))?;
        }
        write!(f, " action={}", self.action.name())?;
        match &self.action {
            RuleAction::Upstream(addr) => write!(f, " upstream={}", addr)?,
            RuleAction::Block {
                reason: Some(reason),
            } => write!(f, " reason={}", shorten(reason))?,
            _ => {}
        }
        write!(f, " {}", self.segmentation)
    }
}

/// Parses `<host_glob>=<mode>[,key=value]*`.
/// Errors are plain reasons; the caller attaches the origin and line.
pub fn parse_rule_line(text: &str, source_order: usize) -> Result<Rule, String> {
    let (glob, rhs) = text.split_once('=').ok_or_else(|| {
        "segment rule must contain '=' (example: '*.example.com=segment_upstream,chunk=512,delay=5')"
            .to_string()
    })?;
    let host = HostGlob::new(glob).ok_or_else(|| format!("invalid host glob '{}'", glob.trim()))?;
    let mut parts = rhs.split(',').map(str::trim).filter(|p| !p.is_empty());
    let mode: Mode = parts
        .next()
        .ok_or_else(|| "segment rule missing mode".to_string())?
        .to_ascii_lowercase()
        .parse()?;

    let mut strategy = None;
    let mut chunk = None;
    let mut min = None;
    let mut max = None;
    let mut delay_ms = 0u64;
    let mut action = None;
    let mut upstream = None;
    let mut reason = None;
    let mut scheme = None;
    let mut method = None;
    let mut path_prefix = None;

    for token in parts {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| format!("invalid rule token '{}', expected key=value", token))?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        match key.as_str() {
            "strategy" => {
                let v = value.to_ascii_lowercase();
                match v.as_str() {
                    "none" | "fixed" | "random" => strategy = Some(v),
                    _ => return Err(format!("unknown strategy '{}'", value)),
                }
            }
            "chunk" => chunk = Some(parse_positive(&key, value)?),
            "min" => min = Some(parse_positive(&key, value)?),
            "max" => max = Some(parse_positive(&key, value)?),
            "delay" => {
                delay_ms = value
                    .parse::<u64>()
                    .map_err(|_| format!("invalid delay '{}'", value))?
            }
            "action" => {
                let v = value.to_ascii_lowercase();
                match v.as_str() {
                    "direct" | "upstream" | "block" => action = Some(v),
                    _ => return Err(format!("unknown action '{}'", value)),
                }
            }
            "upstream" => {
                let addr = value
                    .parse::<NetworkAddr>()
                    .map_err(|e| format!("invalid upstream '{}': {}", value, e))?;
                upstream = Some(addr)
            }
            "reason" => reason = Some(value.to_string()).filter(|r| !r.is_empty()),
            "scheme" => {
                scheme = match value.to_ascii_lowercase().as_str() {
                    "http" => Some(Scheme::Http),
                    "https" => Some(Scheme::Https),
                    "any" | "*" => None,
                    _ => return Err(format!("unknown scheme '{}'", value)),
                }
            }
            "method" => {
                let v = value.to_ascii_uppercase();
                if v.is_empty() || !v.chars().all(|c| c.is_ascii_alphabetic() || c == '*') {
                    return Err(format!("invalid method '{}'", value));
                }
                method = Some(v).filter(|m| m != "ANY" && m != "*");
            }
            "path_prefix" => {
                if !value.is_empty() && !value.starts_with('/') {
                    return Err(format!("path_prefix must start with '/': '{}'", value));
                }
                path_prefix = Some(value.to_string()).filter(|p| !p.is_empty());
            }
            _ => return Err(format!("unknown rule key '{}'", key)),
        }
    }

    let strategy = match strategy.as_deref() {
        None | Some("none") => Strategy::None,
        Some("fixed") => Strategy::Fixed {
            chunk: chunk.unwrap_or(DEFAULT_CHUNK_SIZE),
        },
        _ => match (min, max) {
            (Some(min), Some(max)) if min <= max => Strategy::Random { min, max },
            (Some(min), Some(max)) => {
                return Err(format!("random strategy requires min <= max ({} > {})", min, max))
            }
            _ => return Err("random strategy requires both min and max".to_string()),
        },
    };

    let action = match action.as_deref() {
        None | Some("direct") => {
            if upstream.is_some() {
                return Err("upstream is only valid with action=upstream".to_string());
            }
            RuleAction::Direct
        }
        Some("upstream") => RuleAction::Upstream(
            upstream.ok_or_else(|| "action=upstream requires upstream=<host:port>".to_string())?,
        ),
        _ => {
            if upstream.is_some() {
                return Err("upstream is only valid with action=upstream".to_string());
            }
            RuleAction::Block { reason }
        }
    };

    Ok(Rule {
        host,
        action,
        segmentation: Segmentation {
            mode,
            strategy,
            delay: Duration::from_millis(delay_ms),
        },
        scheme,
        method,
        path_prefix,
        source_order,
    })
}

fn parse_positive(key: &str, value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(_) => Err(format!("{} must be positive", key)),
        Err(_) => Err(format!("invalid {} '{}'", key, value)),
    }
}
