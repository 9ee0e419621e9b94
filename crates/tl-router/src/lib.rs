//! Trunkline Message Router
//!
//! Enterprise integration pattern routing: content-based, multicast,
//! dynamic, splitter, aggregator, choice and filter strategies, each
//! configured once and invoked per message against an exchange context.

pub mod aggregator;
pub mod config;
pub mod context;
pub mod error;
pub mod router;

pub use aggregator::{combine, AggregationGroup};
pub use config::{
    CombineStrategy, RouterKind, RouterTarget, SplitMode, TargetKind, ValueSource,
};
pub use context::{ExchangeContext, ExpressionEvaluator};
pub use error::RouterError;
pub use router::{RouteResult, Router, AGGREGATION_COMPLETE_TARGET};

pub type Result<T> = std::result::Result<T, RouterError>;
