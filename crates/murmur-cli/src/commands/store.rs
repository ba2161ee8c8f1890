use anyhow::{Result, bail};
use colored::Colorize;
use murmur_cache::CacheLayer;
use murmur_store::{KeyTtl, KvStore};
use serde_json::json;

use crate::cli::OutputFormat;
use crate::output::{print_success, print_value};

pub async fn ping(layer: &CacheLayer) -> Result<()> {
    let store = layer.store();
    store.ping().await?;
    print_success(&format!("{} store is reachable", store.backend_name()));
    Ok(())
}

pub async fn get(layer: &CacheLayer, key: &str, format: OutputFormat) -> Result<()> {
    match layer.cache().get_json(key).await {
        Some(value) => print_value(&value, format),
        None => bail!("No cached value for '{key}'"),
    }
    Ok(())
}

fn describe(ttl: KeyTtl) -> String {
    match ttl {
        KeyTtl::Missing => "missing".to_string(),
        KeyTtl::Persistent => "no expiry".to_string(),
        KeyTtl::Expires(secs) => format!("{secs}s"),
    }
}

pub async fn ttl(layer: &CacheLayer, key: &str) -> Result<()> {
    let Some(ttl) = layer.cache().ttl(key).await else {
        bail!("Store unavailable");
    };
    println!("{}: {}", key.cyan(), describe(ttl));
    Ok(())
}

pub async fn lock(layer: &CacheLayer, name: &str, format: OutputFormat) -> Result<()> {
    let key = layer.cache().keys().lock(&[name]);
    let store = layer.store();
    let holder = store.get(&key).await?;
    let ttl = store.ttl(&key).await?;

    let Some(token) = holder else {
        println!("{} is {}", name.cyan(), "free".green());
        return Ok(());
    };
    let token = String::from_utf8_lossy(&token).into_owned();
    match format {
        OutputFormat::Json => print_value(
            &json!({ "lock": name, "owner": token, "ttl": ttl.as_reply() }),
            format,
        ),
        OutputFormat::Table => {
            println!("{} is {}", name.cyan(), "held".yellow());
            println!("{}: {}", "Owner".cyan(), token);
            println!("{}: {}", "Expires in".cyan(), describe(ttl));
        }
    }
    Ok(())
}
