use colored::Colorize;
use serde_json::Value;
use tabled::builder::Builder;
use tabled::settings::Style;

use crate::cli::OutputFormat;

pub fn print_value(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(value) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{value}"),
        },
        OutputFormat::Table => match value {
            Value::Object(map) => {
                let rows = map.iter().map(|(k, v)| {
                    let shown = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    [k.clone(), shown]
                });
                print_table(["Field", "Value"], rows);
            }
            Value::String(s) => println!("{s}"),
            other => println!("{other}"),
        },
    }
}

pub fn print_table<const N: usize, I>(header: [&str; N], rows: I)
where
    I: IntoIterator<Item = [String; N]>,
{
    let mut builder = Builder::default();
    builder.push_record(header);
    let mut empty = true;
    for row in rows {
        builder.push_record(row);
        empty = false;
    }
    if empty {
        println!("{}", "(none)".dimmed());
        return;
    }
    println!("{}", builder.build().with(Style::rounded()));
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
