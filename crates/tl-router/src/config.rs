//! Router configuration.
//!
//! A router is stored as an opaque JSON blob `{type, config}`. The blob is
//! parsed exactly once, at load time, into the closed `RouterKind` enum;
//! per-message execution never re-inspects type strings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    Flow,
    Adapter,
    Processor,
    Router,
}

impl Default for TargetKind {
    fn default() -> Self {
        TargetKind::Flow
    }
}

/// Where a message goes next.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterTarget {
    #[serde(rename = "id")]
    pub target_id: String,
    #[serde(default)]
    pub kind: TargetKind,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RouterTarget {
    pub fn new(target_id: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            target_id: target_id.into(),
            kind,
            metadata: serde_json::Value::Null,
        }
    }
}

/// Where the content-based router reads its routing value from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueSource {
    Header { name: String },
    Variable { name: String },
    #[serde(rename = "xpath")]
    XPath { expression: String },
    JsonPath { expression: String },
}

/// How the splitter carves up a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitMode {
    #[serde(rename = "xpath")]
    XPath { expression: String },
    JsonPath { expression: String },
    Delimiter { delimiter: String },
    Lines,
}

/// How an aggregator combines a completed group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CombineStrategy {
    Concat,
    List,
    XmlCombine,
    JsonArray,
}

/// Fully parsed routing strategy.
#[derive(Debug, Clone)]
pub enum RouterKind {
    ContentBased {
        source: ValueSource,
        routes: HashMap<String, RouterTarget>,
        default: Option<RouterTarget>,
    },
    Multicast {
        targets: Vec<RouterTarget>,
        parallel: bool,
    },
    Dynamic {
        expression: String,
        target_kind: TargetKind,
    },
    Splitter {
        mode: SplitMode,
    },
    Aggregator {
        correlation_expression: String,
        completion_size: usize,
        timeout_ms: u64,
        strategy: CombineStrategy,
    },
    Choice {
        when: Vec<(String, RouterTarget)>,
        otherwise: Option<RouterTarget>,
    },
    Filter {
        condition: String,
        target: RouterTarget,
    },
}

impl RouterKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RouterKind::ContentBased { .. } => "content_based",
            RouterKind::Multicast { .. } => "multicast",
            RouterKind::Dynamic { .. } => "dynamic",
            RouterKind::Splitter { .. } => "splitter",
            RouterKind::Aggregator { .. } => "aggregator",
            RouterKind::Choice { .. } => "choice",
            RouterKind::Filter { .. } => "filter",
        }
    }

    /// Parse a stored `{type, config}` blob.
    pub fn from_json(blob: &serde_json::Value) -> Result<Self> {
        let spec: RawSpec = serde_json::from_value(blob.clone())
            .map_err(|e| RouterError::InvalidConfig(e.to_string()))?;

        let kind = match spec.type_name.as_str() {
            "content_based" => {
                let raw: RawContentBased = parse_config(spec.config)?;
                let mut routes = raw.routes;
                // "_default" is the fallback entry, not a routable value
                let default = routes.remove("_default");
                if routes.is_empty() && default.is_none() {
                    return Err(RouterError::InvalidConfig(
                        "content_based router has no routes".to_string(),
                    ));
                }
                RouterKind::ContentBased {
                    source: raw.source,
                    routes,
                    default,
                }
            }
            "multicast" => {
                let raw: RawMulticast = parse_config(spec.config)?;
                if raw.targets.is_empty() {
                    return Err(RouterError::InvalidConfig(
                        "multicast router has no targets".to_string(),
                    ));
                }
                RouterKind::Multicast {
                    targets: raw.targets,
                    parallel: raw.parallel,
                }
            }
            "dynamic" => {
                let raw: RawDynamic = parse_config(spec.config)?;
                RouterKind::Dynamic {
                    expression: raw.expression,
                    target_kind: raw.target_kind,
                }
            }
            "splitter" => {
                let raw: RawSplitter = parse_config(spec.config)?;
                RouterKind::Splitter { mode: raw.mode }
            }
            "aggregator" => {
                let raw: RawAggregator = parse_config(spec.config)?;
                if raw.completion_size == 0 {
                    return Err(RouterError::InvalidConfig(
                        "aggregator completion_size must be at least 1".to_string(),
                    ));
                }
                RouterKind::Aggregator {
                    correlation_expression: raw.correlation_expression,
                    completion_size: raw.completion_size,
                    timeout_ms: raw.timeout_ms,
                    strategy: raw.strategy,
                }
            }
            "choice" => {
                let raw: RawChoice = parse_config(spec.config)?;
                RouterKind::Choice {
                    when: raw
                        .when
                        .into_iter()
                        .map(|w| (w.condition, w.target))
                        .collect(),
                    otherwise: raw.otherwise,
                }
            }
            "filter" => {
                let raw: RawFilter = parse_config(spec.config)?;
                RouterKind::Filter {
                    condition: raw.condition,
                    target: raw.target,
                }
            }
            other => return Err(RouterError::UnknownType(other.to_string())),
        };
        Ok(kind)
    }
}

fn parse_config<T: serde::de::DeserializeOwned>(config: serde_json::Value) -> Result<T> {
    serde_json::from_value(config).map_err(|e| RouterError::InvalidConfig(e.to_string()))
}

#[derive(Deserialize)]
struct RawSpec {
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    config: serde_json::Value,
}

#[derive(Deserialize)]
struct RawContentBased {
    source: ValueSource,
    routes: HashMap<String, RouterTarget>,
}

#[derive(Deserialize)]
struct RawMulticast {
    targets: Vec<RouterTarget>,
    #[serde(default)]
    parallel: bool,
}

#[derive(Deserialize)]
struct RawDynamic {
    expression: String,
    #[serde(default)]
    target_kind: TargetKind,
}

#[derive(Deserialize)]
struct RawSplitter {
    mode: SplitMode,
}

#[derive(Deserialize)]
struct RawAggregator {
    correlation_expression: String,
    completion_size: usize,
    timeout_ms: u64,
    strategy: CombineStrategy,
}

#[derive(Deserialize)]
struct RawWhen {
    condition: String,
    target: RouterTarget,
}

#[derive(Deserialize)]
struct RawChoice {
    when: Vec<RawWhen>,
    #[serde(default)]
    otherwise: Option<RouterTarget>,
}

#[derive(Deserialize)]
struct RawFilter {
    condition: String,
    target: RouterTarget,
}
