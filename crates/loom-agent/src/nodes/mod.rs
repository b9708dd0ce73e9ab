pub mod model;
pub mod tool;

pub use model::{ModelNode, detect_cycle};
pub use tool::ToolNode;
