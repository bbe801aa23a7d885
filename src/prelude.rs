pub use crate::error::{Error, Result};

pub use tracing::{debug, error, info, warn};

// vim: ts=4
