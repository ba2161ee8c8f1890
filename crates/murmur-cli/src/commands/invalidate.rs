use anyhow::Result;
use murmur_cache::CacheLayer;

use crate::cli::InvalidateCommands;
use crate::output::{print_success, print_warning};

pub async fn run(layer: &CacheLayer, command: &InvalidateCommands) -> Result<()> {
    let cache = layer.cache();
    match command {
        InvalidateCommands::Key(args) => {
            if cache.delete(&args.key).await {
                print_success(&format!("Deleted {}", args.key));
            } else {
                print_warning(&format!("{} was not cached", args.key));
            }
        }
        InvalidateCommands::Tag { tags } => {
            let deleted = cache.invalidate_by_tags(tags).await;
            print_success(&format!("Deleted {deleted} key(s) tagged {}", tags.join(", ")));
        }
        InvalidateCommands::Pattern { glob } => {
            let deleted = cache.invalidate_by_pattern(glob).await;
            print_success(&format!("Deleted {deleted} key(s) matching {glob}"));
        }
    }
    Ok(())
}
