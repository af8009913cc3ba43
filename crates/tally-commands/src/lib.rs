//! Chat command processing for Tally.
//!
//! - [`parse`] -- raw text to [`CommandInvocation`], quote-aware
//! - [`CommandRegistry`] -- immutable catalog of commands and aliases
//! - [`Dispatcher`] -- runs an invocation through the rate-limit and
//!   permission gates, invokes the handler, and records an audit event
//! - [`CommandHandlers`] -- the contract handler sets implement
//! - [`TaskQueue`] -- bounded queue for handler side effects

pub mod dispatcher;
pub mod handler;
pub mod membership;
pub mod parser;
pub mod registry;
pub mod tasks;

pub use dispatcher::{DispatchRequest, Dispatcher};
pub use handler::{CommandHandlers, HandlerContext};
pub use membership::{MembershipLookup, StaticMembership};
pub use parser::{parse, CommandInvocation, InvocationForm, ParseError};
pub use registry::{CommandKind, CommandMetadata, CommandRegistry};
pub use tasks::{BackgroundTask, TaskQueue};
