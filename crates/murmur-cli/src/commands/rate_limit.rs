use anyhow::Result;
use colored::Colorize;
use murmur_cache::{CacheLayer, RateLimitDecision};
use serde_json::json;
use time::format_description::well_known::Rfc3339;

use crate::cli::{OutputFormat, RateLimitCommands};
use crate::output::{print_success, print_value, print_warning};

fn render(decision: &RateLimitDecision, format: OutputFormat) {
    let reset_at = decision
        .reset_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| decision.reset_at.to_string());
    match format {
        OutputFormat::Json => print_value(
            &json!({
                "allowed": decision.allowed,
                "remaining": decision.remaining,
                "reset_at": reset_at,
            }),
            format,
        ),
        OutputFormat::Table => {
            let verdict = if decision.allowed {
                "allowed".green()
            } else {
                "denied".red()
            };
            println!("{}: {}", "Decision".cyan(), verdict);
            println!("{}: {}", "Remaining".cyan(), decision.remaining);
            println!("{}: {}", "Resets at".cyan(), reset_at);
        }
    }
}

pub async fn run(
    layer: &CacheLayer,
    command: &RateLimitCommands,
    format: OutputFormat,
) -> Result<()> {
    let limiter = layer.rate_limiter();
    match command {
        RateLimitCommands::Check {
            identifier,
            action,
            window,
            limit,
        } => {
            let decision = limiter
                .check_rate_limit(identifier, action, *window, *limit)
                .await;
            render(&decision, format);
        }
        RateLimitCommands::Reset { identifier, action } => {
            if limiter.reset(identifier, action).await? {
                print_success(&format!("Reset {action} window for {identifier}"));
            } else {
                print_warning(&format!("No open {action} window for {identifier}"));
            }
        }
    }
    Ok(())
}
