use crate::dispatch::rule::{Rule, RuleAction, Segmentation};
use crate::dispatch::Dispatching;
use crate::proxy::{NetworkAddr, RequestContext};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Direct {
        target: NetworkAddr,
    },
    /// `target` is still the original destination, used for the CONNECT line
    /// or the absolute-form request sent to `proxy`.
    Upstream {
        proxy: NetworkAddr,
        target: NetworkAddr,
    },
    Block {
        reason: Option<String>,
    },
}

impl Route {
    pub fn action(&self) -> &'static str {
        match self {
            Route::Direct { .. } => "direct",
            Route::Upstream { .. } => "upstream",
            Route::Block { .. } => "block",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub matched_rule: Option<Arc<Rule>>,
    /// -1 for the built-in default.
    pub score: i64,
    pub route: Route,
    /// Already reduced to what is applied (see [`Segmentation::effective`]).
    pub segmentation: Segmentation,
    pub explain: String,
}

impl Decision {
    #[cfg(test)]
    pub fn is_block(&self) -> bool {
        matches!(self.route, Route::Block { .. })
    }

    pub fn rule_label(&self) -> String {
        match &self.matched_rule {
            Some(rule) => format!("{}#{}", rule.host, rule.source_order),
            None => "<default>".to_string(),
        }
    }
}

pub struct DecisionEngine {
    dispatching: Arc<Dispatching>,
}

impl DecisionEngine {
    pub fn new(dispatching: Arc<Dispatching>) -> Self {
        Self { dispatching }
    }

    pub fn decide(&self, ctx: &RequestContext) -> Decision {
        let target = ctx.target();
        let (matched_rule, score, route, segmentation) = match self.dispatching.matches(ctx) {
            Some((rule, score)) => {
                let route = match &rule.action {
                    RuleAction::Direct => Route::Direct { target },
                    RuleAction::Upstream(proxy) => Route::Upstream {
                        proxy: proxy.clone(),
                        target,
                    },
                    RuleAction::Block { reason } => Route::Block {
                        reason: reason.clone(),
                    },
                };
                let segmentation = rule.segmentation.effective();
                (Some(rule), score as i64, route, segmentation)
            }
            None => (
                None,
                -1,
                Route::Direct { target },
                self.dispatching.default_segmentation().effective(),
            ),
        };
        let mut decision = Decision {
            matched_rule,
            score,
            route,
            segmentation,
            explain: String::new(),
        };
        decision.explain = explain(&decision);
        decision
    }
}

fn explain(decision: &Decision) -> String {
    format!(
        "rule={} score={} action={} mode={} {}",
        decision.rule_label(),
        decision.score,
        decision.route.action(),
        decision.segmentation.mode,
        decision.segmentation.describe()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::rule::{Mode, Strategy};
    use crate::dispatch::DispatchingBuilder;
    use std::time::Duration;

    fn engine(lines: &[&str]) -> DecisionEngine {
        let mut builder = DispatchingBuilder::new();
        for (idx, line) in lines.iter().enumerate() {
            builder.add_rule_line("inline", idx + 1, line).unwrap();
        }
        DecisionEngine::new(Arc::new(builder.build()))
    }

    #[test]
    fn test_default_decision() {
        let engine = engine(&[]);
        let target = NetworkAddr::new("example.com", 443);
        let decision = engine.decide(&RequestContext::connect(&target));
        assert_eq!(decision.score, -1);
        assert!(decision.matched_rule.is_none());
        assert_eq!(decision.route, Route::Direct { target });
        assert_eq!(decision.segmentation.strategy, Strategy::None);
        assert_eq!(
            decision.explain,
            "rule=<default> score=-1 action=direct mode=direct strategy=none"
        );
    }

    #[test]
    fn test_configured_default_segmentation() {
        let mut builder = DispatchingBuilder::new();
        builder.set_default(Segmentation {
            mode: Mode::SegmentUpstream,
            strategy: Strategy::Fixed { chunk: 512 },
            delay: Duration::from_millis(5),
        });
        let engine = DecisionEngine::new(Arc::new(builder.build()));
        let decision = engine.decide(&RequestContext::connect(&NetworkAddr::new("a.com", 443)));
        assert_eq!(decision.score, -1);
        assert_eq!(decision.route.action(), "direct");
        assert_eq!(
            decision.explain,
            "rule=<default> score=-1 action=direct mode=segment_upstream strategy=fixed chunk=512 delay=5"
        );
    }

    #[test]
    fn test_block_decision() {
        let engine = engine(&["tracker.example.com=direct,action=block,reason=tracking"]);
        let ctx = RequestContext::http(
            "GET",
            &NetworkAddr::new("tracker.example.com", 80),
            "/pixel",
        );
        let decision = engine.decide(&ctx);
        assert!(decision.is_block());
        assert_eq!(
            decision.route,
            Route::Block {
                reason: Some("tracking".to_string())
            }
        );
        assert_eq!(decision.score, 103);
        assert_eq!(
            decision.explain,
            "rule=tracker.example.com#0 score=103 action=block mode=direct strategy=none"
        );
    }

    #[test]
    fn test_upstream_decision() {
        let engine = engine(&[
            "*.example.com=segment_upstream,action=upstream,upstream=127.0.0.1:3128,strategy=fixed,chunk=256",
        ]);
        let target = NetworkAddr::new("sub.example.com", 443);
        let decision = engine.decide(&RequestContext::connect(&target));
        assert_eq!(
            decision.route,
            Route::Upstream {
                proxy: "127.0.0.1:3128".parse().unwrap(),
                target,
            }
        );
        assert_eq!(decision.segmentation.strategy, Strategy::Fixed { chunk: 256 });
        assert_eq!(
            decision.explain,
            "rule=*.example.com#0 score=52 action=upstream mode=segment_upstream strategy=fixed chunk=256 delay=0"
        );
    }

    #[test]
    fn test_direct_mode_forces_no_segmentation() {
        let engine = engine(&["a.com=direct,strategy=random,min=1,max=5,delay=9"]);
        let decision = engine.decide(&RequestContext::connect(&NetworkAddr::new("a.com", 443)));
        assert_eq!(decision.segmentation.strategy, Strategy::None);
        assert_eq!(decision.segmentation.delay, Duration::ZERO);
    }

    #[test]
    fn test_decide_is_deterministic() {
        let engine = engine(&[
            "*=segment_upstream,strategy=random,min=10,max=20",
            "*.example.com=direct,method=GET",
            "*.example.com=direct,action=block",
            "api.example.com=direct,scheme=http,path_prefix=/v1",
        ]);
        let ctx = RequestContext::http("GET", &NetworkAddr::new("api.example.com", 80), "/v1/x");
        let first = engine.decide(&ctx);
        for _ in 0..100 {
            assert_eq!(engine.decide(&ctx), first);
        }
        assert_eq!(first.score, 105);
        assert_eq!(first.route.action(), "direct");
    }
}
