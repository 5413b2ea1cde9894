//! Process locale updates for language and region changes.

use tracing::{debug, warn};

use crate::error::{AgentError, AgentResult};

/// Variables set on a language change.
pub const LANGUAGE_VARS: [&str; 3] = ["LANG", "LANGUAGE", "LC_MESSAGES"];

/// Variables set on a region change.
pub const REGION_VARS: [&str; 11] = [
    "LC_CTYPE",
    "LC_NUMERIC",
    "LC_TIME",
    "LC_COLLATE",
    "LC_MONETARY",
    "LC_PAPER",
    "LC_NAME",
    "LC_ADDRESS",
    "LC_TELEPHONE",
    "LC_MEASUREMENT",
    "LC_IDENTIFICATION",
];

/// Applies locale changes to the process.
pub trait LocaleEnv {
    fn apply_language(&mut self, language: &str) -> AgentResult<()>;

    fn apply_region(&mut self, region: &str) -> AgentResult<()>;
}

/// Writes the locale environment variables and re-runs `setlocale`.
///
/// Mutates process-global state. Other threads may run alongside the agent,
/// but none may read the C environment or locale while a change is applied.
#[derive(Debug, Default)]
pub struct ProcessLocale;

impl ProcessLocale {
    pub fn new() -> Self {
        Self
    }

    fn apply(vars: &[&str], value: &str) -> AgentResult<()> {
        check_value(value)?;
        for var in vars {
            // SAFETY: caller guarantees no other thread reads or writes the
            // C environment (getenv, setlocale, localtime) while this runs.
            unsafe {
                std::env::set_var(var, value);
            }
        }
        reload_locale();
        Ok(())
    }
}

impl LocaleEnv for ProcessLocale {
    fn apply_language(&mut self, language: &str) -> AgentResult<()> {
        debug!("Locale: language -> {}", language);
        Self::apply(&LANGUAGE_VARS, language)
    }

    fn apply_region(&mut self, region: &str) -> AgentResult<()> {
        debug!("Locale: region -> {}", region);
        Self::apply(&REGION_VARS, region)
    }
}

fn check_value(value: &str) -> AgentResult<()> {
    if value.is_empty() || value.contains(['\0', '=']) {
        return Err(AgentError::InvalidArgument(format!(
            "invalid locale value '{}'",
            value.escape_debug()
        )));
    }
    Ok(())
}

fn reload_locale() {
    // SAFETY: the argument is a valid NUL-terminated string.
    let result = unsafe { libc::setlocale(libc::LC_ALL, c"".as_ptr()) };
    if result.is_null() {
        warn!("Locale: setlocale(LC_ALL, \"\") failed, keeping previous locale");
    }
}
