pub mod callbacks;
mod dispatcher;
pub mod handle;

pub use callbacks::CallbackRegistry;
pub use handle::SttClient;
