//! OpenIPTV core: configuration, errors, logging, locators, time units and
//! the protocol seams shared by the player and the input service.

pub mod config;
pub mod error;
pub mod locator;
pub mod logging;
pub mod protocol;
pub mod time;

pub use config::Config;
pub use error::{Error, Result};
pub use locator::{Locator, LocatorKind};
pub use protocol::{ClientMessage, Connector, DispatchError, MessageDispatcher, ServerEvent};
