//! Aggregation groups and combine strategies.

use tokio::time::Instant;

use crate::config::CombineStrategy;

/// In-memory buffer of messages sharing one correlation key.
///
/// Created lazily on the first arrival for a key and destroyed when the
/// completion policy fires. Messages keep arrival order.
#[derive(Debug)]
pub struct AggregationGroup {
    pub messages: Vec<String>,
    pub created_at: Instant,
}

impl AggregationGroup {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            created_at: Instant::now(),
        }
    }

    pub fn age_ms(&self) -> u128 {
        self.created_at.elapsed().as_millis()
    }
}

impl Default for AggregationGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Combine buffered messages into one payload.
pub fn combine(strategy: CombineStrategy, messages: &[String]) -> String {
    match strategy {
        CombineStrategy::Concat => messages.join("\n"),
        CombineStrategy::List => {
            serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
        }
        CombineStrategy::JsonArray => {
            let values: Vec<serde_json::Value> = messages
                .iter()
                .map(|m| {
                    serde_json::from_str(m)
                        .unwrap_or_else(|_| serde_json::Value::String(m.clone()))
                })
                .collect();
            serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string())
        }
        CombineStrategy::XmlCombine => {
            let mut out = String::from("<aggregated>");
            for message in messages {
                out.push_str(strip_xml_declaration(message));
            }
            out.push_str("</aggregated>");
            out
        }
    }
}

fn strip_xml_declaration(xml: &str) -> &str {
    let trimmed = xml.trim_start();
    if trimmed.starts_with("<?xml") {
        match trimmed.find("?>") {
            Some(end) => trimmed[end + 2..].trim_start(),
            None => trimmed,
        }
    } else {
        trimmed
    }
}
