pub mod request;
pub mod resolver;
pub mod planner;
pub mod apply;

pub use request::{ChangeActivityStateBuilder, ChangeStateRequest, MoveOperation, MoveSource};
