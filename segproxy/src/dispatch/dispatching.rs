use crate::config::RuleParseError;
use crate::dispatch::rule::{parse_rule_line, Rule, Segmentation};
use crate::proxy::RequestContext;
use std::sync::Arc;

/// Immutable ordered rule set plus the policy used when nothing matches.
#[derive(Debug, Default)]
pub struct Dispatching {
    rules: Vec<Arc<Rule>>,
    default: Segmentation,
}

impl Dispatching {
    /// Best rule for `ctx`: highest score, then `block`, then declaration order.
    pub fn matches(&self, ctx: &RequestContext) -> Option<(Arc<Rule>, u32)> {
        let mut best: Option<(&Arc<Rule>, u32)> = None;
        for rule in &self.rules {
            let Some(score) = rule.score(ctx) else {
                continue;
            };
            let better = match best {
                None => true,
                Some((current, best_score)) => {
                    score > best_score
                        || (score == best_score
                            && rule.action.is_block()
                            && !current.action.is_block())
                }
            };
            if better {
                best = Some((rule, score));
            }
        }
        best.map(|(rule, score)| (rule.clone(), score))
    }

    pub fn rules(&self) -> &[Arc<Rule>] {
        self.rules.as_slice()
    }

    pub fn default_segmentation(&self) -> &Segmentation {
        &self.default
    }
}

#[derive(Debug, Default)]
pub struct DispatchingBuilder {
    rules: Vec<Rule>,
    default: Segmentation,
}

impl DispatchingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, default: Segmentation) {
        self.default = default;
    }

    /// Parses one rule line; `origin` and `line` only label errors.
    pub fn add_rule_line(
        &mut self,
        origin: &str,
        line: usize,
        text: &str,
    ) -> Result<(), RuleParseError> {
        let rule = parse_rule_line(text, self.rules.len())
            .map_err(|reason| RuleParseError::new(origin, line, reason))?;
        self.rules.push(rule);
        Ok(())
    }

    pub fn build(self) -> Dispatching {
        Dispatching {
            rules: self.rules.into_iter().map(Arc::new).collect(),
            default: self.default,
        }
    }
}
