//! Per-message routing execution.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::aggregator::{combine, AggregationGroup};
use crate::config::{RouterKind, RouterTarget, SplitMode, TargetKind, ValueSource};
use crate::context::{ExchangeContext, ExpressionEvaluator};
use crate::Result;

/// Synthetic target returned when an aggregation group completes.
pub const AGGREGATION_COMPLETE_TARGET: &str = "aggregation-complete";

/// Outcome of one routing invocation. HOLD and FILTERED are normal
/// outcomes, not failures; every caller must handle all six.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteResult {
    /// Dispatch to these targets. `parallel` signals that the caller may
    /// dispatch them concurrently.
    Success {
        targets: Vec<RouterTarget>,
        parallel: bool,
    },
    /// No route matched and no default was configured.
    NoMatch,
    /// A filter condition evaluated false; the message is deliberately
    /// dropped.
    Filtered,
    /// The message was consumed into an aggregation group that is not yet
    /// complete. Do not re-route it.
    Hold,
    /// The router is administratively inactive.
    Inactive,
    /// Evaluation or configuration failed for this message.
    Error(String),
}

impl RouteResult {
    fn single(target: RouterTarget) -> Self {
        RouteResult::Success {
            targets: vec![target],
            parallel: false,
        }
    }
}

pub struct Router {
    id: String,
    kind: RouterKind,
    active: AtomicBool,
    evaluator: Arc<dyn ExpressionEvaluator>,
    /// Aggregation state, keyed by correlation id. Unused for other kinds.
    groups: DashMap<String, AggregationGroup>,
}

impl Router {
    pub fn new(
        id: impl Into<String>,
        kind: RouterKind,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            active: AtomicBool::new(true),
            evaluator,
            groups: DashMap::new(),
        }
    }

    /// Build a router from its stored `{type, config}` blob.
    pub fn from_json(
        id: impl Into<String>,
        blob: &serde_json::Value,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        let kind = RouterKind::from_json(blob)?;
        Ok(Self::new(id, kind, evaluator))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &RouterKind {
        &self.kind
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Number of open aggregation groups, for observability.
    pub fn open_groups(&self) -> usize {
        self.groups.len()
    }

    /// Route one message.
    pub async fn route(&self, ctx: &mut ExchangeContext) -> RouteResult {
        if !self.is_active() {
            return RouteResult::Inactive;
        }

        let result = match &self.kind {
            RouterKind::ContentBased {
                source,
                routes,
                default,
            } => self.route_content_based(ctx, source, routes, default).await,
            RouterKind::Multicast { targets, parallel } => RouteResult::Success {
                targets: targets.clone(),
                parallel: *parallel,
            },
            RouterKind::Dynamic {
                expression,
                target_kind,
            } => self.route_dynamic(ctx, expression, *target_kind).await,
            RouterKind::Splitter { mode } => self.route_splitter(ctx, mode).await,
            RouterKind::Aggregator {
                correlation_expression,
                completion_size,
                timeout_ms,
                strategy,
            } => {
                self.route_aggregator(
                    ctx,
                    correlation_expression,
                    *completion_size,
                    *timeout_ms,
                    *strategy,
                )
                .await
            }
            RouterKind::Choice { when, otherwise } => {
                self.route_choice(ctx, when, otherwise).await
            }
            RouterKind::Filter { condition, target } => {
                self.route_filter(ctx, condition, target).await
            }
        };

        if let RouteResult::Error(msg) = &result {
            warn!(router_id = %self.id, error = %msg, "Routing failed");
        }
        result
    }

    async fn route_content_based(
        &self,
        ctx: &ExchangeContext,
        source: &ValueSource,
        routes: &std::collections::HashMap<String, RouterTarget>,
        default: &Option<RouterTarget>,
    ) -> RouteResult {
        let value = match self.extract_value(ctx, source).await {
            Ok(value) => value,
            Err(e) => return RouteResult::Error(e.to_string()),
        };

        let matched = value.as_deref().and_then(|v| routes.get(v));
        match matched.or(default.as_ref()) {
            Some(target) => {
                debug!(
                    router_id = %self.id,
                    value = value.as_deref().unwrap_or("-"),
                    target = %target.target_id,
                    "Content-based route matched"
                );
                RouteResult::single(target.clone())
            }
            None => RouteResult::NoMatch,
        }
    }

    async fn extract_value(
        &self,
        ctx: &ExchangeContext,
        source: &ValueSource,
    ) -> anyhow::Result<Option<String>> {
        let value = match source {
            ValueSource::Header { name } => ctx.header(name).map(str::to_string),
            ValueSource::Variable { name } => ctx.variable(name).map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            }),
            ValueSource::XPath { expression } => {
                self.evaluator.xpath(expression, ctx).await?.into_iter().next()
            }
            ValueSource::JsonPath { expression } => self
                .evaluator
                .json_path(expression, ctx)
                .await?
                .into_iter()
                .next(),
        };
        Ok(value)
    }

    async fn route_dynamic(
        &self,
        ctx: &ExchangeContext,
        expression: &str,
        target_kind: TargetKind,
    ) -> RouteResult {
        match self.evaluator.value(expression, ctx).await {
            Ok(target_id) if target_id.is_empty() => RouteResult::NoMatch,
            Ok(target_id) => RouteResult::single(RouterTarget::new(target_id, target_kind)),
            Err(e) => RouteResult::Error(e.to_string()),
        }
    }

    async fn route_splitter(&self, ctx: &mut ExchangeContext, mode: &SplitMode) -> RouteResult {
        let parts: Vec<String> = match mode {
            SplitMode::XPath { expression } => {
                match self.evaluator.xpath(expression, ctx).await {
                    Ok(parts) => parts,
                    Err(e) => return RouteResult::Error(e.to_string()),
                }
            }
            SplitMode::JsonPath { expression } => {
                match self.evaluator.json_path(expression, ctx).await {
                    Ok(parts) => parts,
                    Err(e) => return RouteResult::Error(e.to_string()),
                }
            }
            SplitMode::Delimiter { delimiter } => ctx
                .payload
                .split(delimiter.as_str())
                .map(str::to_string)
                .collect(),
            SplitMode::Lines => ctx.payload.lines().map(str::to_string).collect(),
        };

        ctx.set_variable("split.parts", serde_json::json!(parts));
        ctx.set_variable("split.count", serde_json::json!(parts.len()));

        let targets = parts
            .iter()
            .enumerate()
            .map(|(i, part)| RouterTarget {
                target_id: format!("part-{}", i),
                kind: TargetKind::Processor,
                metadata: serde_json::json!({"part": part, "index": i}),
            })
            .collect();
        RouteResult::Success {
            targets,
            parallel: false,
        }
    }

    async fn route_aggregator(
        &self,
        ctx: &mut ExchangeContext,
        correlation_expression: &str,
        completion_size: usize,
        timeout_ms: u64,
        strategy: crate::config::CombineStrategy,
    ) -> RouteResult {
        let key = match self.evaluator.value(correlation_expression, ctx).await {
            Ok(key) if key.is_empty() => {
                return RouteResult::Error("empty correlation key".to_string())
            }
            Ok(key) => key,
            Err(e) => return RouteResult::Error(e.to_string()),
        };

        // Completion is decided and the group removed under the same entry
        // lock, so a group completes exactly once and a concurrent arrival
        // for the same key either joins before the removal or starts a
        // fresh group. The timeout is only checked here; a quiet group can
        // sit past its deadline until the next arrival nudges it.
        let completed = match self.groups.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                let group = entry.get_mut();
                group.messages.push(ctx.payload.clone());
                let size_reached = group.messages.len() >= completion_size;
                let timed_out = group.age_ms() >= timeout_ms as u128;
                if size_reached || timed_out {
                    Some(entry.remove().messages)
                } else {
                    None
                }
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let mut group = AggregationGroup::new();
                group.messages.push(ctx.payload.clone());
                if group.messages.len() >= completion_size {
                    Some(group.messages)
                } else {
                    entry.insert(group);
                    None
                }
            }
        };

        match completed {
            Some(messages) => {
                debug!(
                    router_id = %self.id,
                    correlation_id = %key,
                    count = messages.len(),
                    "Aggregation group completed"
                );
                ctx.payload = combine(strategy, &messages);
                RouteResult::single(RouterTarget::new(
                    AGGREGATION_COMPLETE_TARGET,
                    TargetKind::Processor,
                ))
            }
            None => RouteResult::Hold,
        }
    }

    async fn route_choice(
        &self,
        ctx: &ExchangeContext,
        when: &[(String, RouterTarget)],
        otherwise: &Option<RouterTarget>,
    ) -> RouteResult {
        for (condition, target) in when {
            match self.evaluator.condition(condition, ctx).await {
                Ok(true) => return RouteResult::single(target.clone()),
                Ok(false) => continue,
                Err(e) => return RouteResult::Error(e.to_string()),
            }
        }
        match otherwise {
            Some(target) => RouteResult::single(target.clone()),
            None => RouteResult::NoMatch,
        }
    }

    async fn route_filter(
        &self,
        ctx: &ExchangeContext,
        condition: &str,
        target: &RouterTarget,
    ) -> RouteResult {
        match self.evaluator.condition(condition, ctx).await {
            Ok(true) => RouteResult::single(target.clone()),
            Ok(false) => RouteResult::Filtered,
            Err(e) => RouteResult::Error(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CombineStrategy;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Toy evaluator for tests. Conditions are literal "true"/"false" or
    /// "header.<name>=<value>"; value expressions are "header.<name>" or a
    /// literal; xpath/json_path split the payload on commas.
    struct StubEvaluator;

    #[async_trait]
    impl ExpressionEvaluator for StubEvaluator {
        async fn xpath(
            &self,
            _expression: &str,
            ctx: &ExchangeContext,
        ) -> anyhow::Result<Vec<String>> {
            Ok(ctx.payload.split(',').map(str::to_string).collect())
        }

        async fn json_path(
            &self,
            _expression: &str,
            ctx: &ExchangeContext,
        ) -> anyhow::Result<Vec<String>> {
            Ok(ctx.payload.split(',').map(str::to_string).collect())
        }

        async fn condition(
            &self,
            expression: &str,
            ctx: &ExchangeContext,
        ) -> anyhow::Result<bool> {
            match expression {
                "true" => Ok(true),
                "false" => Ok(false),
                "boom" => anyhow::bail!("cannot evaluate: boom"),
                other => {
                    let (lhs, rhs) = other
                        .split_once('=')
                        .ok_or_else(|| anyhow::anyhow!("bad condition: {}", other))?;
                    let name = lhs.trim_start_matches("header.");
                    Ok(ctx.header(name) == Some(rhs))
                }
            }
        }

        async fn value(
            &self,
            expression: &str,
            ctx: &ExchangeContext,
        ) -> anyhow::Result<String> {
            if let Some(name) = expression.strip_prefix("header.") {
                Ok(ctx.header(name).unwrap_or("").to_string())
            } else {
                Ok(expression.to_string())
            }
        }
    }

    fn router(kind: RouterKind) -> Router {
        Router::new("router-1", kind, Arc::new(StubEvaluator))
    }

    fn content_based() -> Router {
        let blob = json!({
            "type": "content_based",
            "config": {
                "source": {"type": "header", "name": "region"},
                "routes": {
                    "A": {"id": "t1"},
                    "B": {"id": "t2"},
                    "_default": {"id": "t3"}
                }
            }
        });
        Router::from_json("router-1", &blob, Arc::new(StubEvaluator)).unwrap()
    }

    #[tokio::test]
    async fn inactive_router_short_circuits() {
        let router = content_based();
        router.set_active(false);
        let mut ctx = ExchangeContext::new("").with_header("region", "A");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Inactive);
    }

    #[tokio::test]
    async fn content_based_matches_and_falls_back() {
        let router = content_based();

        let mut ctx = ExchangeContext::new("").with_header("region", "B");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets[0].target_id, "t2"),
            other => panic!("unexpected: {:?}", other),
        }

        // Unknown value falls back to the default entry
        let mut ctx = ExchangeContext::new("").with_header("region", "Z");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets[0].target_id, "t3"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn content_based_without_default_is_no_match() {
        let blob = json!({
            "type": "content_based",
            "config": {
                "source": {"type": "header", "name": "region"},
                "routes": {"A": {"id": "t1"}}
            }
        });
        let router = Router::from_json("router-1", &blob, Arc::new(StubEvaluator)).unwrap();

        let mut ctx = ExchangeContext::new("").with_header("region", "Z");
        assert_eq!(router.route(&mut ctx).await, RouteResult::NoMatch);
    }

    #[tokio::test]
    async fn multicast_returns_all_targets() {
        let router = router(RouterKind::Multicast {
            targets: vec![
                RouterTarget::new("t1", TargetKind::Flow),
                RouterTarget::new("t2", TargetKind::Adapter),
            ],
            parallel: true,
        });

        let mut ctx = ExchangeContext::new("payload");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, parallel } => {
                assert_eq!(targets.len(), 2);
                assert!(parallel);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dynamic_resolves_target_at_runtime() {
        let router = router(RouterKind::Dynamic {
            expression: "header.next".to_string(),
            target_kind: TargetKind::Flow,
        });

        let mut ctx = ExchangeContext::new("").with_header("next", "billing-flow");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => {
                assert_eq!(targets[0].target_id, "billing-flow");
                assert_eq!(targets[0].kind, TargetKind::Flow);
            }
            other => panic!("unexpected: {:?}", other),
        }

        // Missing header resolves to an empty id
        let mut ctx = ExchangeContext::new("");
        assert_eq!(router.route(&mut ctx).await, RouteResult::NoMatch);
    }

    #[tokio::test]
    async fn splitter_sets_variables_and_part_targets() {
        let router = router(RouterKind::Splitter {
            mode: SplitMode::Delimiter {
                delimiter: ";".to_string(),
            },
        });

        let mut ctx = ExchangeContext::new("a;b;c");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => {
                assert_eq!(targets.len(), 3);
                assert_eq!(targets[1].kind, TargetKind::Processor);
                assert_eq!(targets[1].metadata["part"], json!("b"));
                assert_eq!(targets[1].metadata["index"], json!(1));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(ctx.variable("split.count"), Some(&json!(3)));
        assert_eq!(ctx.variable("split.parts"), Some(&json!(["a", "b", "c"])));
    }

    #[tokio::test]
    async fn splitter_by_lines() {
        let router = router(RouterKind::Splitter {
            mode: SplitMode::Lines,
        });
        let mut ctx = ExchangeContext::new("one\ntwo");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn choice_first_true_wins_then_otherwise() {
        let router = router(RouterKind::Choice {
            when: vec![
                ("header.priority=high".to_string(), RouterTarget::new("fast", TargetKind::Flow)),
                ("true".to_string(), RouterTarget::new("slow", TargetKind::Flow)),
            ],
            otherwise: Some(RouterTarget::new("fallback", TargetKind::Flow)),
        });

        let mut ctx = ExchangeContext::new("").with_header("priority", "high");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets[0].target_id, "fast"),
            other => panic!("unexpected: {:?}", other),
        }

        let router = router2_no_catchall();
        let mut ctx = ExchangeContext::new("");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets[0].target_id, "fallback"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    fn router2_no_catchall() -> Router {
        router(RouterKind::Choice {
            when: vec![(
                "header.priority=high".to_string(),
                RouterTarget::new("fast", TargetKind::Flow),
            )],
            otherwise: Some(RouterTarget::new("fallback", TargetKind::Flow)),
        })
    }

    #[tokio::test]
    async fn choice_without_otherwise_is_no_match() {
        let router = router(RouterKind::Choice {
            when: vec![(
                "false".to_string(),
                RouterTarget::new("never", TargetKind::Flow),
            )],
            otherwise: None,
        });
        let mut ctx = ExchangeContext::new("");
        assert_eq!(router.route(&mut ctx).await, RouteResult::NoMatch);
    }

    #[tokio::test]
    async fn filter_passes_or_drops() {
        let router = router(RouterKind::Filter {
            condition: "header.keep=yes".to_string(),
            target: RouterTarget::new("sink", TargetKind::Adapter),
        });

        let mut ctx = ExchangeContext::new("").with_header("keep", "yes");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => assert_eq!(targets[0].target_id, "sink"),
            other => panic!("unexpected: {:?}", other),
        }

        let mut ctx = ExchangeContext::new("");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Filtered);
    }

    #[tokio::test]
    async fn evaluator_failure_is_an_error_value() {
        let router = router(RouterKind::Filter {
            condition: "boom".to_string(),
            target: RouterTarget::new("sink", TargetKind::Flow),
        });
        let mut ctx = ExchangeContext::new("");
        assert!(matches!(router.route(&mut ctx).await, RouteResult::Error(_)));
    }

    fn aggregator(completion_size: usize, timeout_ms: u64) -> Router {
        router(RouterKind::Aggregator {
            correlation_expression: "header.order-id".to_string(),
            completion_size,
            timeout_ms,
            strategy: CombineStrategy::Concat,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_completes_on_size() {
        let router = aggregator(3, 60_000);

        let mut ctx = ExchangeContext::new("m1").with_header("order-id", "42");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);

        tokio::time::advance(Duration::from_secs(10)).await;
        let mut ctx = ExchangeContext::new("m2").with_header("order-id", "42");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);

        tokio::time::advance(Duration::from_secs(10)).await;
        let mut ctx = ExchangeContext::new("m3").with_header("order-id", "42");
        match router.route(&mut ctx).await {
            RouteResult::Success { targets, .. } => {
                assert_eq!(targets[0].target_id, AGGREGATION_COMPLETE_TARGET);
                assert_eq!(targets[0].kind, TargetKind::Processor);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(ctx.payload, "m1\nm2\nm3");
        assert_eq!(router.open_groups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_times_out_lazily() {
        let router = aggregator(3, 60_000);

        let mut ctx = ExchangeContext::new("m1").with_header("order-id", "7");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);

        // Past the deadline the group still sits there until nudged
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(router.open_groups(), 1);

        let mut ctx = ExchangeContext::new("m2").with_header("order-id", "7");
        match router.route(&mut ctx).await {
            RouteResult::Success { .. } => {}
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(ctx.payload, "m1\nm2");
        assert_eq!(router.open_groups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_keys_groups_independently() {
        let router = aggregator(2, 60_000);

        let mut ctx = ExchangeContext::new("a1").with_header("order-id", "A");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);
        let mut ctx = ExchangeContext::new("b1").with_header("order-id", "B");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);
        assert_eq!(router.open_groups(), 2);

        let mut ctx = ExchangeContext::new("a2").with_header("order-id", "A");
        match router.route(&mut ctx).await {
            RouteResult::Success { .. } => assert_eq!(ctx.payload, "a1\na2"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(router.open_groups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregator_completion_size_one_never_buffers() {
        let router = aggregator(1, 60_000);
        let mut ctx = ExchangeContext::new("m1").with_header("order-id", "9");
        match router.route(&mut ctx).await {
            RouteResult::Success { .. } => assert_eq!(ctx.payload, "m1"),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(router.open_groups(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn group_age_restarts_after_completion() {
        let router = aggregator(2, 60_000);

        let mut ctx = ExchangeContext::new("m1").with_header("order-id", "5");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);
        tokio::time::advance(Duration::from_secs(61)).await;
        let mut ctx = ExchangeContext::new("m2").with_header("order-id", "5");
        assert!(matches!(
            router.route(&mut ctx).await,
            RouteResult::Success { .. }
        ));

        // The next message for the same key starts a brand new group and
        // must not inherit the old group's age
        let mut ctx = ExchangeContext::new("m3").with_header("order-id", "5");
        assert_eq!(router.route(&mut ctx).await, RouteResult::Hold);
        tokio::time::advance(Duration::from_secs(30)).await;
        let mut ctx = ExchangeContext::new("m4").with_header("order-id", "5");
        match router.route(&mut ctx).await {
            RouteResult::Success { .. } => assert_eq!(ctx.payload, "m3\nm4"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn aggregator_rejects_empty_correlation_key() {
        let router = aggregator(2, 60_000);
        let mut ctx = ExchangeContext::new("m1");
        assert!(matches!(router.route(&mut ctx).await, RouteResult::Error(_)));
    }
}
