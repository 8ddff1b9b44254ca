pub mod lease;
pub mod manager;
pub mod registry;

pub use lease::RecorderLease;
pub use manager::{ClientAttachment, PrepareRequest, SttDaemon};
pub use registry::{Session, SessionRegistry};
