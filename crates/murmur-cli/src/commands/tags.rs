use anyhow::Result;
use murmur_cache::CacheLayer;
use murmur_store::KeyKind;
use serde_json::json;

use crate::cli::{OutputFormat, TagsCommands};
use crate::output::{print_success, print_table, print_value};

pub async fn run(layer: &CacheLayer, command: &TagsCommands, format: OutputFormat) -> Result<()> {
    let cache = layer.cache();
    let index = cache.tag_index();
    match command {
        TagsCommands::Members { tag } => {
            let members = index.members(tag).await?;
            // Show logical keys, the way they are passed to other commands.
            let keys: Vec<String> = members
                .iter()
                .map(|m| {
                    cache
                        .keys()
                        .strip_path(KeyKind::Cache, m)
                        .unwrap_or_else(|| m.clone())
                })
                .collect();
            match format {
                OutputFormat::Json => print_value(&json!({ "tag": tag, "keys": keys }), format),
                OutputFormat::Table => print_table(["Key"], keys.into_iter().map(|k| [k])),
            }
        }
        TagsCommands::Of(args) => {
            let tags = index.tags_of(&cache.full_key(&args.key)).await?;
            match format {
                OutputFormat::Json => print_value(&json!({ "key": args.key, "tags": tags }), format),
                OutputFormat::Table => print_table(["Tag"], tags.into_iter().map(|t| [t])),
            }
        }
        TagsCommands::Prune { tags } => {
            let mut total = 0;
            for tag in tags {
                total += index.prune(tag).await?;
            }
            print_success(&format!("Removed {total} dangling membership(s)"));
        }
    }
    Ok(())
}
