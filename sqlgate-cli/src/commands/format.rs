use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use sqlgate::query::{Dialect, QueryRequest, Statement};

use super::render_parameters;

#[derive(Args)]
pub struct FormatArgs {
    /// Base query wrapped as a derived table
    #[arg(long, value_name = "SQL")]
    base: String,

    /// Filter expression
    #[arg(long, value_name = "FILTER")]
    filter: Option<String>,

    /// Ordering, e.g. "created_at desc, id"
    #[arg(long, value_name = "ORDER")]
    order_by: Option<String>,

    /// Return at most N rows
    #[arg(long, value_name = "N")]
    top: Option<u64>,

    /// Rows to skip (requires --take and --order-by)
    #[arg(long, value_name = "N")]
    skip: Option<u64>,

    /// Window size used with --skip
    #[arg(long, value_name = "N")]
    take: Option<u64>,
}

impl FormatArgs {
    fn into_request(self) -> QueryRequest {
        QueryRequest {
            base_query: self.base,
            filter: self.filter,
            order_by: self.order_by,
            top: self.top,
            skip: self.skip,
            take: self.take,
            ..QueryRequest::default()
        }
    }
}

pub fn execute(args: FormatArgs, dialect: Dialect, json: bool) -> Result<()> {
    let statement = args
        .into_request()
        .to_statement(dialect)
        .context("Request could not be formatted")?;
    println!("{}", render(&statement, json)?);
    Ok(())
}

fn render(statement: &Statement, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(statement)?);
    }

    let mut out = format!("{}", statement.text.green());
    if !statement.parameters.is_empty() {
        out.push_str(&format!(
            "\n{}\n{}",
            "Parameters:".bold(),
            render_parameters(&statement.parameters)
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(base: &str) -> FormatArgs {
        FormatArgs {
            base: base.to_string(),
            filter: None,
            order_by: None,
            top: None,
            skip: None,
            take: None,
        }
    }

    #[test]
    fn test_window_statement() {
        let request = FormatArgs {
            order_by: Some("id".into()),
            skip: Some(20),
            take: Some(10),
            ..args("select * from items")
        }
        .into_request();
        let statement = request.to_statement(Dialect::SqlServer).unwrap();
        colored::control::set_override(false);
        assert_eq!(
            render(&statement, false).unwrap(),
            "SELECT * FROM (select * from items) V WHERE 1=1 ORDER BY id OFFSET (20) ROWS FETCH NEXT (10) ROWS ONLY"
        );
    }

    #[test]
    fn test_json_output() {
        let statement = FormatArgs {
            filter: Some("name eq 'a'".into()),
            top: Some(5),
            ..args("select * from items")
        }
        .into_request()
        .to_statement(Dialect::SqlServer)
        .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&render(&statement, true).unwrap()).unwrap();
        assert_eq!(
            value["text"],
            "SELECT TOP(5) * FROM (select * from items) V WHERE 1=1 AND name = @__filter_0"
        );
        assert_eq!(value["parameters"]["__filter_0"], "a");
    }

    #[test]
    fn test_skip_without_take_is_rejected() {
        let request = FormatArgs {
            skip: Some(5),
            ..args("select 1")
        }
        .into_request();
        assert!(request.to_statement(Dialect::SqlServer).is_err());
    }
}
