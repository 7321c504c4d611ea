//! Domain model (IDs, status, records, errors).
//!
//! Architecture-agnostic: nothing here knows about Redis, timers or HTTP.

pub mod errors;
pub mod ids;
pub mod method;
pub mod state;
pub mod task;

pub use self::errors::{ErrorKind, Result, SchedulerError};
pub use self::ids::TaskId;
pub use self::method::HttpMethod;
pub use self::state::TaskStatus;
pub use self::task::TaskRecord;
