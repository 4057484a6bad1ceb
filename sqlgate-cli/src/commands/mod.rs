pub mod format;
pub mod translate;

use colored::Colorize;
use sqlgate::query::Parameters;

/// One `@name = value` line per parameter, in name order
pub(crate) fn render_parameters(parameters: &Parameters) -> String {
    parameters
        .iter()
        .map(|(name, value)| format!("  {} = {}", format!("@{}", name).cyan(), value))
        .collect::<Vec<_>>()
        .join("\n")
}
