//! Console state store driving the admin UI against the local `/api` routes.

pub mod client;
pub mod live;
pub mod session;
pub mod state;

pub use client::{ConsoleClient, ConsoleError};
pub use live::{LiveMode, LiveUpdate};
pub use session::{SessionData, SessionStore};
pub use state::{DatastoreConsole, EntryView};
