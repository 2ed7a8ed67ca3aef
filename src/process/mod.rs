//! External process management

pub mod supervisor;

pub use supervisor::{
    ExitReport, ProcessHandle, ProcessSupervisor, CLEAN_EXIT_CODES, DEFAULT_SHUTDOWN_TIMEOUT,
    DEFAULT_STOP_TIMEOUT,
};
