//! Blog Caching Demo
//!
//! Caches author details and comments that embed the author's name, then
//! expires one author's group and shows which values get recomputed.
//!
//! Usage:
//!   cargo run --example blog_demo
//!
//! Environment variables (also read from `.env`):
//!   POTATOCACHE_GROUP_PREFIX     - prefix for group marker keys (default: group:)
//!   POTATOCACHE_ON_BACKEND_ERROR - propagate | recompute (default: propagate)
//!   RUST_LOG                     - log filter (default: info)

use potatocache::{CacheConfig, Memoizer, MemoryBackend};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct Comment {
    text: String,
    author_id: u32,
}

async fn load_comment(
    id: u32,
    comment: Option<Comment>,
    authors: Arc<RwLock<HashMap<u32, String>>>,
) -> anyhow::Result<(String, String)> {
    let comment = comment.ok_or_else(|| anyhow::anyhow!("no comment {}", id))?;
    let name = authors
        .read()
        .map_err(|_| anyhow::anyhow!("author table poisoned"))?
        .get(&comment.author_id)
        .cloned()
        .unwrap_or_default();

    Ok((comment.text, name))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Group-Tagged Cache Demo ===");

    let config = CacheConfig::from_env()?;
    info!("Using group prefix {:?}", config.group_key_prefix);

    let backend = Arc::new(MemoryBackend::new());
    let memoizer = Memoizer::new(backend.clone(), config)?;

    // stand-in for a database
    let authors: Arc<RwLock<HashMap<u32, String>>> = Arc::new(RwLock::new(HashMap::from([
        (1, "John".to_string()),
        (2, "Bob".to_string()),
    ])));
    let comments: Arc<HashMap<u32, Comment>> = Arc::new(HashMap::from([
        (1, Comment { text: "text1".to_string(), author_id: 1 }),
        (2, Comment { text: "text2".to_string(), author_id: 2 }),
    ]));

    let author_db = authors.clone();
    let author_details = memoizer
        .cached::<u32>()
        .arg_key(|id| format!("author:{}", id))
        .arg_groups(|id| vec![format!("author{}_data", id)])
        .debug(true)
        .build(move |id: u32| {
            let name = author_db.read().map(|db| db.get(&id).cloned()).map_err(|_| ());
            async move {
                match name {
                    Ok(Some(name)) => Ok(name),
                    Ok(None) => Err(anyhow::anyhow!("no author {}", id)),
                    Err(_) => Err(anyhow::anyhow!("author table poisoned")),
                }
            }
        })?;

    let comment_db = comments.clone();
    let comment_author_db = authors.clone();
    let comment_details = memoizer
        .cached::<u32>()
        .arg_key(|id| format!("comment:{}", id))
        .arg_groups(move |id| {
            comments
                .get(id)
                .map(|c| vec![format!("author{}_data", c.author_id)])
                .unwrap_or_default()
        })
        .debug(true)
        .build(move |id: u32| load_comment(id, comment_db.get(&id).cloned(), comment_author_db.clone()))?;

    let author_calls = author_details.call_stats().unwrap_or_default();
    let comment_calls = comment_details.call_stats().unwrap_or_default();

    info!("\n--- First access (cache cold) ---");
    info!("author 1:  {}", author_details.call(1).await?);
    info!("comment 1: {:?}", comment_details.call(1).await?);
    info!("comment 2: {:?}", comment_details.call(2).await?);

    info!("\n--- Second access (cache warm) ---");
    author_details.call(1).await?;
    comment_details.call(1).await?;
    comment_details.call(2).await?;
    info!(
        "recomputations so far: authors={}, comments={}",
        author_calls.call_count(),
        comment_calls.call_count()
    );

    info!("\n--- Renaming both authors, expiring only author1_data ---");
    if let Ok(mut db) = authors.write() {
        for name in db.values_mut() {
            name.push('2');
        }
    }
    let event = memoizer.invalidator().invalidate_groups(["author1_data"]).await?;
    info!("{} at {}: {:?}", event.reason, event.timestamp, event.keys);

    info!("author 1:  {}", author_details.call(1).await?);
    info!("comment 1: {:?}", comment_details.call(1).await?);
    info!("comment 2: {:?} (author2_data not expired)", comment_details.call(2).await?);
    info!(
        "recomputations: authors={}, comments={}",
        author_calls.call_count(),
        comment_calls.call_count()
    );

    info!("\n--- Statistics ---");
    info!("{}", memoizer.stats());
    info!("backend: {:?}", backend.stats().await);

    Ok(())
}
