//! Error types for the test harness.

/// Errors raised while acquiring or releasing output capture.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CaptureError {
    /// The calling thread already holds an active capture.
    #[error("output capture is already active on this thread")]
    AlreadyActive,

    /// The standard output or error descriptor could not be redirected.
    #[error("failed to redirect console streams: {0}")]
    Redirect(String),
}

/// Errors raised while classifying the symbols of a test module.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum DiscoveryError {
    /// The same symbol name was defined more than once.
    #[error("symbol defined more than once: {0}")]
    DuplicateSymbol(String),

    /// A symbol with a reserved prefix or name holds the wrong kind of value.
    #[error("symbol {name} must be {expected}, found {found}")]
    UnexpectedSymbolType {
        /// Name of the offending symbol.
        name: String,
        /// Description of the kind of value that was expected.
        expected: &'static str,
        /// Description of the kind of value that was found.
        found: &'static str,
    },
}

/// Errors that prevent a subprocess test from being launched.
#[derive(thiserror::Error, Debug)]
pub enum LaunchError {
    /// No program or arguments were available to run.
    #[error("cannot run {0} with no arguments")]
    NoArguments(String),

    /// An argument cannot be passed to a child process.
    #[error("command arguments contain unsupported values: {0:?}")]
    UnsupportedArguments(Vec<String>),

    /// The operating system refused to start the child process.
    #[error("failed to launch {command}: {source}")]
    Spawn {
        /// The command line that failed to launch.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}
