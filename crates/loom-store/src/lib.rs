pub mod memory;
pub mod store;
pub mod types;

pub use memory::MemoryStore;
pub use store::{
    JobStore, LockHandle, LockManager, MessageStore, RunStore, StoreError, StoreResult,
    ToolDefinitionStore,
};
pub use types::{
    AgentMessageData, ClusterId, ClusterSettings, CreateJobRequest, CreatedJob,
    GenericMessageData, Invocation, InvocationResultData, Job, JobId, JobStatus, MessageData,
    MessageId, MessageKind, ResultType, Run, RunId, RunMessage, RunStatus, RunTags, TestMock,
    ToolDefinition, new_id,
};
