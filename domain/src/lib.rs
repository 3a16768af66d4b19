//! Client-side behaviour built on the session and the event stream: which
//! surface is active, and the message history/send calls.

pub mod error;
pub mod messages;
pub mod redirect;

pub use error::Error;
pub use messages::MessagesClient;
pub use redirect::{Navigator, RedirectController, Surface};
