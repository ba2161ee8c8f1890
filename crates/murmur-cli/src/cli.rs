use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "murmur-cache")]
#[command(about = "Inspect and maintain the murmur cache layer")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(short, long, global = true)]
    pub format: Option<OutputFormat>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Use an in-process store instead of Redis (for trying commands out)
    #[arg(long, global = true, env = "MURMUR_CACHE_LOCAL")]
    pub local: bool,
}

#[derive(Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check store connectivity
    Ping,
    /// Show a cached value by logical key (e.g. user:id:42)
    Get(KeyArgs),
    /// Show the remaining lifetime of a cached key
    Ttl(KeyArgs),
    /// Show who holds a lock and for how long
    Lock(LockArgs),
    /// Invalidate cached entries
    Invalidate(InvalidateArgs),
    /// Inspect or repair the tag index
    Tags(TagsArgs),
    /// Check or reset a rate limit window
    RateLimit(RateLimitArgs),
}

#[derive(clap::Args)]
pub struct KeyArgs {
    /// Logical cache key, without prefix
    pub key: String,
}

#[derive(clap::Args)]
pub struct LockArgs {
    /// Lock name
    pub name: String,
}

#[derive(clap::Args)]
pub struct InvalidateArgs {
    #[command(subcommand)]
    pub command: InvalidateCommands,
}

#[derive(Subcommand)]
pub enum InvalidateCommands {
    /// Delete one key
    Key(KeyArgs),
    /// Delete every key carrying any of the tags
    Tag {
        #[arg(required = true)]
        tags: Vec<String>,
    },
    /// Delete every key matching a glob (e.g. "feed:*")
    Pattern { glob: String },
}

#[derive(clap::Args)]
pub struct TagsArgs {
    #[command(subcommand)]
    pub command: TagsCommands,
}

#[derive(Subcommand)]
pub enum TagsCommands {
    /// List the keys indexed under a tag
    Members { tag: String },
    /// List the tags recorded for a key
    Of(KeyArgs),
    /// Remove memberships whose key has expired
    Prune {
        #[arg(required = true)]
        tags: Vec<String>,
    },
}

#[derive(clap::Args)]
pub struct RateLimitArgs {
    #[command(subcommand)]
    pub command: RateLimitCommands,
}

#[derive(Subcommand)]
pub enum RateLimitCommands {
    /// Count one request and print the decision
    Check {
        identifier: String,
        action: String,
        /// Window length in seconds
        #[arg(long, default_value = "60", value_parser = parse_seconds)]
        window: Duration,
        #[arg(long, default_value_t = 5)]
        limit: u64,
    },
    /// Clear the current window
    Reset { identifier: String, action: String },
}

fn parse_seconds(raw: &str) -> Result<Duration, String> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| format!("invalid number of seconds: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_rate_limit_check() {
        let cli = Cli::try_parse_from([
            "murmur-cache",
            "rate-limit",
            "check",
            "10.0.0.1",
            "login",
            "--window",
            "30",
        ])
        .unwrap();
        let Commands::RateLimit(args) = cli.command else {
            panic!("expected rate-limit");
        };
        let RateLimitCommands::Check { window, limit, .. } = args.command else {
            panic!("expected check");
        };
        assert_eq!(window, Duration::from_secs(30));
        assert_eq!(limit, 5);
    }
}
