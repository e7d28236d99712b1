//! User-visible warning reporting.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// Receiver for human-readable configuration and transport failures.
///
/// The host decides how to present them; the networking core never does.
pub trait WarningSink: Send + Sync {
    fn report(&self, severity: Severity, message: &str);
}

impl<F> WarningSink for F
where
    F: Fn(Severity, &str) + Send + Sync,
{
    fn report(&self, severity: Severity, message: &str) {
        self(severity, message)
    }
}

/// Default sink: forwards every report to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWarnings;

impl WarningSink for TracingWarnings {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!(target: "etherlink", "{message}"),
            Severity::Warning => tracing::warn!(target: "etherlink", "{message}"),
            Severity::Error => tracing::error!(target: "etherlink", "{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |severity: Severity, message: &str| {
            seen.lock().unwrap().push((severity, message.to_owned()));
        };
        sink.report(Severity::Warning, "no carrier");
        assert_eq!(
            seen.into_inner().unwrap(),
            vec![(Severity::Warning, "no carrier".to_owned())]
        );
    }
}
