mod isolate_runner;
mod runner;
mod simple_runner;

use isolate_runner::IsolateRunner;
pub use runner::{
    is_safe_file_name, signal_name, SandboxFile, SandboxLimits, SandboxResult, SandboxRunner,
    MSG_MEMORY_LIMIT, MSG_OK, MSG_RUNTIME_ERROR, MSG_TIME_LIMIT,
};
use simple_runner::SimpleRunner;

use anyhow::Result;

/// Creates a sandbox runner based on environment configuration
///
/// If the NO_ISOLATE environment variable is set to "1", creates a
/// SimpleRunner that provides basic timeout functionality without security
/// isolation. Otherwise, creates an IsolateRunner with full sandboxing
/// capabilities.
pub fn create_sandbox_runner(id: u8) -> Result<Box<dyn SandboxRunner>> {
    if is_no_isolate_mode() {
        log::info!("Creating SimpleRunner {id} (NO_ISOLATE mode)");
        let runner = SimpleRunner::build(id)?;
        Ok(Box::new(runner))
    } else {
        log::info!("Creating IsolateRunner {id} (full isolation mode)");
        let runner = IsolateRunner::build(id)?;
        Ok(Box::new(runner))
    }
}

/// Check if we're in no-isolate mode
pub fn is_no_isolate_mode() -> bool {
    std::env::var("NO_ISOLATE").unwrap_or_default() == "1"
}
