pub mod cfg;
pub mod cmd;
pub mod dispatch;
pub mod logging;
pub mod report;
pub mod server;
pub mod stat;
pub mod template;
pub mod token;
pub mod transport;
pub mod worker;

pub use self::{cfg::Config, dispatch::Dispatcher, report::Report};
