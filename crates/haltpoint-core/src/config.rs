//! # Session Settings
//!
//! Knobs that change how a session drives its target.
//!
//! ## Environment Variables
//!
//! - `HALTPOINT_STOP_AT_ENTRY`: install a breakpoint at the runtime entry point on launch (default: on)
//! - `HALTPOINT_DETACH_ON_QUIT`: `quit()` detaches from attached targets instead of killing them (default: on)
//! - `HALTPOINT_PASS_SIGNALS`: comma list of signals handed straight back to the target (unix only)
//! - `HALTPOINT_DISABLE_ASLR`: launch targets with address randomisation turned off (default: on)
//!
//! Boolean values accept `1/true/yes/on` and `0/false/no/off`. Anything else
//! is logged and the default is kept.

use std::env;

use tracing::warn;

/// Signals passed through to the target by default.
///
/// These are asynchronous notifications that programs expect to receive and
/// that would otherwise turn every `go()` into a spurious stop.
#[cfg(unix)]
pub const DEFAULT_PASS_SIGNALS: &[i32] = &[
    libc::SIGCHLD,
    libc::SIGWINCH,
    libc::SIGURG,
    libc::SIGPROF,
    libc::SIGVTALRM,
    libc::SIGIO,
];

/// Signals passed through to the target by default.
#[cfg(not(unix))]
pub const DEFAULT_PASS_SIGNALS: &[i32] = &[];

/// Settings for one [`DebuggerController`](crate::DebuggerController).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerSettings
{
    /// Break at the runtime entry point after `launch()`.
    pub stop_at_entry_point: bool,
    /// `quit()` on an attached target detaches rather than kills.
    pub detach_on_quit: bool,
    /// Signals re-delivered to the target without reporting a stop.
    pub pass_signals: Vec<i32>,
    /// Launch with address space layout randomisation disabled.
    pub disable_aslr: bool,
}

impl Default for DebuggerSettings
{
    fn default() -> Self
    {
        Self {
            stop_at_entry_point: true,
            detach_on_quit: true,
            pass_signals: DEFAULT_PASS_SIGNALS.to_vec(),
            disable_aslr: true,
        }
    }
}

impl DebuggerSettings
{
    /// Defaults overlaid with the `HALTPOINT_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// `from_env()` passes `std::env::var`; tests pass a map.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();

        if let Some(value) = lookup("HALTPOINT_STOP_AT_ENTRY") {
            apply_bool("HALTPOINT_STOP_AT_ENTRY", &value, &mut settings.stop_at_entry_point);
        }
        if let Some(value) = lookup("HALTPOINT_DETACH_ON_QUIT") {
            apply_bool("HALTPOINT_DETACH_ON_QUIT", &value, &mut settings.detach_on_quit);
        }
        if let Some(value) = lookup("HALTPOINT_DISABLE_ASLR") {
            apply_bool("HALTPOINT_DISABLE_ASLR", &value, &mut settings.disable_aslr);
        }
        if let Some(value) = lookup("HALTPOINT_PASS_SIGNALS") {
            match parse_signal_list(&value) {
                Ok(signals) => settings.pass_signals = signals,
                Err(bad) => warn!(variable = "HALTPOINT_PASS_SIGNALS", value = %bad, "Ignoring unknown signal list"),
            }
        }

        settings
    }

    /// Whether `signal` is handed straight back to the target.
    #[must_use]
    pub fn passes_signal(&self, signal: i32) -> bool
    {
        self.pass_signals.contains(&signal)
    }
}

fn apply_bool(variable: &str, value: &str, slot: &mut bool)
{
    match parse_bool(value) {
        Some(parsed) => *slot = parsed,
        None => warn!(variable, value, "Ignoring invalid boolean setting"),
    }
}

/// Parse a permissive boolean.
#[must_use]
pub fn parse_bool(value: &str) -> Option<bool>
{
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a comma separated list of signal names or numbers.
///
/// An empty string yields an empty list. The first entry that cannot be
/// parsed is returned as the error.
pub fn parse_signal_list(value: &str) -> Result<Vec<i32>, String>
{
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| parse_signal(entry).ok_or_else(|| entry.to_string()))
        .collect()
}

/// Parse one signal given as a number, `SIGNAME` or `NAME`.
#[must_use]
pub fn parse_signal(value: &str) -> Option<i32>
{
    if let Ok(number) = value.parse::<i32>() {
        return (number > 0).then_some(number);
    }
    let upper = value.to_ascii_uppercase();
    let name = upper.strip_prefix("SIG").unwrap_or(&upper);
    SIGNAL_NAMES.iter().find(|(candidate, _)| *candidate == name).map(|(_, number)| *number)
}

#[cfg(unix)]
const SIGNAL_NAMES: &[(&str, i32)] = &[
    ("HUP", libc::SIGHUP),
    ("INT", libc::SIGINT),
    ("QUIT", libc::SIGQUIT),
    ("USR1", libc::SIGUSR1),
    ("USR2", libc::SIGUSR2),
    ("PIPE", libc::SIGPIPE),
    ("ALRM", libc::SIGALRM),
    ("TERM", libc::SIGTERM),
    ("CHLD", libc::SIGCHLD),
    ("CONT", libc::SIGCONT),
    ("TSTP", libc::SIGTSTP),
    ("TTIN", libc::SIGTTIN),
    ("TTOU", libc::SIGTTOU),
    ("URG", libc::SIGURG),
    ("XCPU", libc::SIGXCPU),
    ("XFSZ", libc::SIGXFSZ),
    ("VTALRM", libc::SIGVTALRM),
    ("PROF", libc::SIGPROF),
    ("WINCH", libc::SIGWINCH),
    ("IO", libc::SIGIO),
    ("SYS", libc::SIGSYS),
];

#[cfg(not(unix))]
const SIGNAL_NAMES: &[(&str, i32)] = &[];

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults()
    {
        let settings = DebuggerSettings::from_lookup(|_| None);
        assert_eq!(settings, DebuggerSettings::default());
        assert!(settings.stop_at_entry_point);
        assert!(settings.detach_on_quit);
        assert!(settings.disable_aslr);
    }

    #[test]
    fn test_bool_overrides()
    {
        let settings = DebuggerSettings::from_lookup(lookup(&[
            ("HALTPOINT_STOP_AT_ENTRY", "off"),
            ("HALTPOINT_DETACH_ON_QUIT", "0"),
            ("HALTPOINT_DISABLE_ASLR", "No"),
        ]));
        assert!(!settings.stop_at_entry_point);
        assert!(!settings.detach_on_quit);
        assert!(!settings.disable_aslr);
    }

    #[test]
    fn test_invalid_values_keep_defaults()
    {
        let settings = DebuggerSettings::from_lookup(lookup(&[
            ("HALTPOINT_STOP_AT_ENTRY", "maybe"),
            ("HALTPOINT_PASS_SIGNALS", "SIGNOPE"),
        ]));
        assert!(settings.stop_at_entry_point);
        assert_eq!(settings.pass_signals, DEFAULT_PASS_SIGNALS.to_vec());
    }

    #[test]
    fn test_parse_bool()
    {
        assert_eq!(parse_bool(" TRUE "), Some(true));
        assert_eq!(parse_bool("yes"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool(""), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_parse_signal_list()
    {
        assert_eq!(
            parse_signal_list("SIGUSR1, term,10").unwrap(),
            vec![libc::SIGUSR1, libc::SIGTERM, 10]
        );
        assert_eq!(parse_signal_list("").unwrap(), Vec::<i32>::new());
        assert_eq!(parse_signal_list("USR2,bogus").unwrap_err(), "bogus");
        assert_eq!(parse_signal("-3"), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_pass_signal_override()
    {
        let settings = DebuggerSettings::from_lookup(lookup(&[("HALTPOINT_PASS_SIGNALS", "SIGUSR1")]));
        assert!(settings.passes_signal(libc::SIGUSR1));
        assert!(!settings.passes_signal(libc::SIGCHLD));
    }
}
