//! Run execution engine for Loom.
//!
//! A run alternates between a model step, which asks the model for its next
//! move, and a tool step, which executes the tool invocations the model asked
//! for. Every produced message is persisted before the next step is chosen,
//! so an interrupted run resumes from its stored history.

pub mod cache;
pub mod config;
pub mod errors;
pub mod machine;
pub mod messages;
pub mod nodes;
pub mod notify;
pub mod overflow;
pub mod prompt;
pub mod run;
pub mod schema;
pub mod search;
pub mod state;
pub mod summarizer;
pub mod title;
pub mod tools;

pub use cache::*;
pub use config::*;
pub use errors::*;
pub use machine::*;
pub use messages::*;
pub use nodes::{ModelNode, ToolNode, detect_cycle};
pub use notify::*;
pub use overflow::*;
pub use prompt::*;
pub use run::*;
pub use schema::*;
pub use search::*;
pub use state::*;
pub use summarizer::*;
pub use title::*;
pub use tools::{
    AgentTool, ClusterSettingsCache, MockToolResolver, ResolverChain, ServiceFunctionResolver,
    ServiceFunctionTools, StdlibTools, ToolCall, ToolDescriptor, ToolExecutor, ToolFuture,
    ToolOutcome, ToolResolver, ToolResponse, default_resolver_chain, parse_tool_response,
};
