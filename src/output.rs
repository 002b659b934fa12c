//! # Terminal Output
//!
//! Colour and symbol selection for the human-readable output of the CLI.
//!
//! Colour is decided once, from the `--color` flag and the environment:
//! - `--color=always|never|auto`
//! - `NO_COLOR` disables colours when set (per https://no-color.org/)
//! - `CLICOLOR=0` disables, `CLICOLOR_FORCE=1` forces colours
//! - `TERM=dumb` disables colours
//!
//! Machine-readable output (dumps, JSON views) never goes through here.

use std::env;

use console::style;

use crate::config::MergedConfig;

/// Whether colours and symbols are used in output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    /// Build from the value of `--color` and the environment.
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        // presence alone disables, even when empty
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// `ok` line, e.g. `✓ poky checked out at 1a2b3c4d5e6f`.
    pub fn success(&self, message: &str) -> String {
        if self.use_color {
            format!("{} {}", style("✓").green().bold(), message)
        } else {
            format!("[OK] {}", message)
        }
    }

    /// Error line; multi-line messages keep their indentation.
    pub fn failure(&self, message: &str) -> String {
        if self.use_color {
            format!("{} {}", style("✗").red().bold(), style(message).red())
        } else {
            format!("[ERROR] {}", message)
        }
    }

    pub fn warning(&self, message: &str) -> String {
        if self.use_color {
            format!("{} {}", style("!").yellow().bold(), message)
        } else {
            format!("[WARN] {}", message)
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Commit ids are shown abbreviated.
pub fn short_commit(commit: &str) -> &str {
    commit.get(..12).unwrap_or(commit)
}

/// One summary line per repository of `config`, in declaration order.
pub fn checkout_summary(output: &OutputConfig, config: &MergedConfig) -> Vec<String> {
    config
        .repos()
        .iter()
        .map(|spec| {
            let at = match config.commit(&spec.id) {
                Some(commit) => format!("at {}", short_commit(commit)),
                None if spec.operations_disabled => "used as is".to_string(),
                None => "at unknown commit".to_string(),
            };
            output.success(&format!("{} {} ({})", spec.name, at, spec.path.display()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_always() {
        assert!(OutputConfig::from_env_and_flag("always").use_color);
    }

    #[test]
    fn test_color_never() {
        assert!(!OutputConfig::from_env_and_flag("NEVER").use_color);
    }

    #[test]
    fn test_plain_lines() {
        let out = OutputConfig::plain();
        assert_eq!(out.success("poky at abc"), "[OK] poky at abc");
        assert_eq!(out.warning("careful"), "[WARN] careful");
        let err = crate::error::Error::Interrupted;
        assert_eq!(out.failure(&err.to_string()), "[ERROR] Interrupted");
    }

    #[test]
    fn test_colored_lines_keep_message() {
        let out = OutputConfig { use_color: true };
        assert!(out.success("poky").contains("poky"));
    }

    #[test]
    fn test_short_commit() {
        assert_eq!(
            short_commit("0123456789abcdef0123456789abcdef01234567"),
            "0123456789ab"
        );
        assert_eq!(short_commit("abc"), "abc");
    }
}
