mod domain;

pub use domain::{Limits, Status, NOT_TERMINATED, TERMINATED_BY_SIGNAL};
