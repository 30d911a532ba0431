//! Pure domain logic for the inkstone backend.
//!
//! Everything in this crate is side-effect free apart from
//! [`watermark`], which touches the filesystem. No database access, no
//! network I/O — those live in `inkstone-db` and the pipeline crates.

pub mod error;
pub mod hashing;
pub mod order_number;
pub mod order_status;
pub mod task_status;
pub mod types;
pub mod watermark;

pub use error::{CoreError, TaskErrorKind};
pub use order_status::{OrderEvent, OrderStatus};
pub use task_status::TaskStatus;
