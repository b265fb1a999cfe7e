mod limits;
pub use limits::Limits;

mod status;
pub use status::{Status, NOT_TERMINATED, TERMINATED_BY_SIGNAL};
