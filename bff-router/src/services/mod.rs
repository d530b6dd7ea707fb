//! Implementation of the various backend services.

mod dispatcher;
mod fetch;
pub(crate) mod http;

pub use self::dispatcher::ServiceDispatcher;
pub use self::fetch::Datatype;
pub use self::fetch::FetchOptions;
pub use self::fetch::FetchPlan;
pub use self::http::Exchange;
pub use self::http::Transport;
pub use self::http::TransportRequest;
