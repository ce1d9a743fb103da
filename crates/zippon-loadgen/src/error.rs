use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to start `{}`: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("process did not expose a piped {0}")]
    MissingPipe(&'static str),

    #[error("failed to start {stream} reader thread: {source}")]
    Reader {
        stream: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("command body must not contain a double quote or line break: {0:?}")]
    InvalidCommand(String),

    #[error("failed to write request: {0}")]
    Write(#[source] io::Error),

    #[error("no response frame within {0:?}")]
    Timeout(Duration),

    /// A previous request timed out; its frame may still arrive and would be
    /// read as the answer to the next request.
    #[error("session is desynchronized after an earlier timeout")]
    Desynchronized,

    #[error("failed to reap process {pid}: {source}")]
    Wait {
        pid: u32,
        #[source]
        source: io::Error,
    },
}
