//! Actor base: lifecycle, mailbox and run loop shared by every component

pub mod lifecycle;
pub mod runtime;

pub use lifecycle::{ActorState, CancelToken};
pub use runtime::{Actor, ActorContext, ActorHandle, ActorRef, Mail, MailboxSubscriber};
