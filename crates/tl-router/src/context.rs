//! Exchange context and the expression evaluation seam.

use std::collections::HashMap;

use async_trait::async_trait;

/// One message moving through a flow: payload plus transport headers and
/// flow-scoped variables.
#[derive(Debug, Clone, Default)]
pub struct ExchangeContext {
    pub payload: String,
    pub headers: HashMap<String, String>,
    pub variables: HashMap<String, serde_json::Value>,
}

impl ExchangeContext {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            headers: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: serde_json::Value) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Option<&serde_json::Value> {
        self.variables.get(name)
    }
}

/// Expression evaluation over a context. Implemented by the embedding
/// platform; routing only needs these four shapes.
#[async_trait]
pub trait ExpressionEvaluator: Send + Sync {
    /// XPath node-set over the payload, as strings.
    async fn xpath(&self, expression: &str, ctx: &ExchangeContext) -> anyhow::Result<Vec<String>>;

    /// JSONPath match set over the payload, as strings.
    async fn json_path(
        &self,
        expression: &str,
        ctx: &ExchangeContext,
    ) -> anyhow::Result<Vec<String>>;

    /// Boolean condition string.
    async fn condition(&self, expression: &str, ctx: &ExchangeContext) -> anyhow::Result<bool>;

    /// General routing expression producing a single value, e.g. a target
    /// id or a correlation key.
    async fn value(&self, expression: &str, ctx: &ExchangeContext) -> anyhow::Result<String>;
}
