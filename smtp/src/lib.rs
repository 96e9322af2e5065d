//! SMTP front end that turns every received message into an incident alert.
//!
//! The [`Server`] accepts connections and runs one [`Session`] per
//! connection. Sessions ask a [`MailHandler`] for an [`Envelope`] on each
//! MAIL command, feed it recipients and body lines, and finalize it once
//! the body terminator arrives.

pub mod command;
pub mod envelope;
pub mod handler;
pub mod server;
pub mod session;

pub use command::*;
pub use envelope::*;
pub use handler::*;
pub use server::*;
pub use session::*;
