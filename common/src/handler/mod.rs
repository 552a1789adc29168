// Schedule handler: dispatch, publish, confirm, fan out

pub mod correlation;
pub mod dispatcher;
pub mod lifecycle;
pub mod listener;
pub mod publisher;

pub use correlation::{CorrelationContext, CorrelationRegistry, PendingDelivery};
pub use dispatcher::Dispatcher;
pub use lifecycle::{EventHandler, FLUSH_TIMEOUT};
pub use listener::ConfirmationListener;
pub use publisher::Publisher;
