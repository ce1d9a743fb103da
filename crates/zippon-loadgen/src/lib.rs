//! ZipponDB load generation.
//!
//! Fabricates `ADD User (...)` commands and pushes them through a running
//! ZipponDB process over its standard streams:
//!
//! ```text
//!  RecordGenerator ──► run "<command>"\n ──► stdin  ┌──────────────┐
//!                                                  │   ZipponDB   │
//!  Response text   ◄── <text> 0x03 (ETX) ◄── stdout └──────────────┘
//! ```
//!
//! - [`record`]: seeded random `User` records and their command text
//! - [`channel`]: one process lifetime, framed request/response, guaranteed reaping
//! - [`driver`]: the session loop used by the CLI

pub mod channel;
pub mod driver;
pub mod error;
pub mod record;

pub use channel::{with_session, ChannelConfig, ProcessSession, Response, ETX};
pub use driver::{run_load, LoadObserver, LoadPlan, LoadReport, SessionReport};
pub use error::ChannelError;
pub use record::{RecordGenerator, UserRecord};
