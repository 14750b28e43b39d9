//! Output formatting module
//!
//! Table and JSON rendering for command results, plus the one-line
//! rendering of quota events printed while `watch` runs.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Display;
use tabled::{Table, Tabled};

use vpnquota_core::UsageEvent;

/// Output format enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {}. Use 'table' or 'json'", s)),
        }
    }
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Render an optional number for table cells
pub fn or_dash<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Print data in the specified format
pub fn print_output<T>(data: &[T], format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("No items found.");
            } else {
                let table = Table::new(data).to_string();
                println!("{}", table);
            }
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(data)?;
            println!("{}", json);
        }
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T>(data: &T, format: OutputFormat) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
{
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        println!("{}", Table::new([data]));
    }
    Ok(())
}

/// One line for a quota event: compact JSON, or the message colored by
/// severity
pub fn render_event(event: &UsageEvent, format: OutputFormat) -> anyhow::Result<String> {
    if format == OutputFormat::Json {
        return Ok(serde_json::to_string(event)?);
    }
    let message = event.message();
    Ok(match event {
        UsageEvent::LimitReachedAlert { .. } => message.red().bold().to_string(),
        UsageEvent::UsageWarning { .. } => message.yellow().to_string(),
        UsageEvent::DailyReset { .. } | UsageEvent::ServerReset => message,
    })
}

/// Print a quota event. JSON lines are printed even in quiet mode.
pub fn print_event(event: &UsageEvent, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    if quiet && format == OutputFormat::Table {
        return Ok(());
    }
    println!("{}", render_event(event, format)?);
    Ok(())
}

/// Print a success message (respects quiet mode)
pub fn print_success(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.green());
    }
}

/// Print a warning message (respects quiet mode)
pub fn print_warning(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message.yellow());
    }
}

/// Print an info message (respects quiet mode)
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        println!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("table".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("TABLE".parse::<OutputFormat>().unwrap(), OutputFormat::Table);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_or_dash() {
        assert_eq!(or_dash(Some(42)), "42");
        assert_eq!(or_dash::<u64>(None), "-");
    }

    #[test]
    fn test_render_event_json_is_one_line() {
        let event = UsageEvent::UsageWarning {
            percent: 80,
            used_mb: 820,
            limit_mb: 1024,
        };
        let line = render_event(&event, OutputFormat::Json).unwrap();
        assert!(!line.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value, serde_json::to_value(&event).unwrap());
    }

    #[test]
    fn test_render_event_table_keeps_message() {
        colored::control::set_override(false);
        let event = UsageEvent::LimitReachedAlert {
            used_mb: 1024,
            limit_mb: 1024,
        };
        assert_eq!(
            render_event(&event, OutputFormat::Table).unwrap(),
            event.message()
        );
        assert_eq!(
            render_event(&UsageEvent::ServerReset, OutputFormat::Table).unwrap(),
            UsageEvent::ServerReset.message()
        );
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
    }
}
