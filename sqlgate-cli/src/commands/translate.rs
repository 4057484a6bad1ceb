use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;
use sqlgate::filter::{PredicateFragment, Translator};
use sqlgate::query::{Dialect, Parameters};

use super::render_parameters;

#[derive(Serialize)]
struct TranslateOutput<'a> {
    dialect: Dialect,
    predicate: &'a str,
    parameters: &'a Parameters,
}

pub fn execute(filter: &str, dialect: Dialect, json: bool) -> Result<()> {
    let fragment = Translator::new(dialect)
        .translate(filter)
        .context("Filter could not be translated")?;
    println!("{}", render(&fragment, dialect, json)?);
    Ok(())
}

fn render(fragment: &PredicateFragment, dialect: Dialect, json: bool) -> Result<String> {
    if json {
        let output = TranslateOutput {
            dialect,
            predicate: fragment.as_sql(),
            parameters: fragment.parameters(),
        };
        return Ok(serde_json::to_string_pretty(&output)?);
    }

    if fragment.is_empty() {
        return Ok(format!("{}", "(empty filter: no predicate)".dimmed()));
    }

    let mut out = format!("{}\n{}", "Predicate:".bold(), fragment.as_sql().green());
    if !fragment.parameters().is_empty() {
        out.push_str(&format!(
            "\n{}\n{}",
            "Parameters:".bold(),
            render_parameters(fragment.parameters())
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_json() {
        let fragment = Translator::new(Dialect::Postgres)
            .translate("name eq 'a'")
            .unwrap();
        let rendered = render(&fragment, Dialect::Postgres, true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(value["dialect"], "postgres");
        assert_eq!(value["predicate"], "AND name = @__filter_0");
        assert_eq!(value["parameters"]["__filter_0"], "a");
    }

    #[test]
    fn test_render_text() {
        colored::control::set_override(false);
        let fragment = Translator::new(Dialect::SqlServer)
            .translate("age ge 18")
            .unwrap();
        let rendered = render(&fragment, Dialect::SqlServer, false).unwrap();
        assert!(rendered.contains("AND age >= @__filter_0"));
        assert!(rendered.contains("@__filter_0 = 18"));
    }
}
