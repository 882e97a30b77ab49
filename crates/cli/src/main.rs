// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use stackcache_cli::cli::{Cli, Commands, DemoArgs};
use stackcache_cli::logging::init_tracing;
use stackcache_cli::profile::{cache_key, UserDirectory, UserProfile};
use stackcache_cli::stack_factory::build_stack;
use stackcache_core::config::Config;
use stackcache_core::{CacheSettings, CacheStack};
use tracing::{info, warn};

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::load_from_env()?,
    };

    if let Some(layers) = &cli.layers {
        config.apply_overrides(|name| match name {
            "STACKCACHE_LAYERS" => Some(layers.clone()),
            "STACKCACHE_FILE_DIR" => std::env::var(name).ok(),
            _ => None,
        })?;
    }

    Ok(config)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn get_or_set(
    stack: &CacheStack<UserProfile>,
    directory: &Arc<UserDirectory>,
    settings: CacheSettings,
    id: i32,
) -> stackcache_core::Result<UserProfile> {
    let directory = Arc::clone(directory);

    stack
        .get_or_set(
            &cache_key(id),
            move |_previous| async move { directory.lookup(id).await },
            settings,
        )
        .await
}

async fn demo(
    stack: &CacheStack<UserProfile>,
    directory: &Arc<UserDirectory>,
    args: DemoArgs,
    defaults: CacheSettings,
) -> Result<()> {
    info!(
        "Firing {} concurrent lookups for {}",
        args.concurrency,
        cache_key(args.lookup.id)
    );

    let handles: Vec<_> = (0..args.concurrency)
        .map(|_| {
            let stack = stack.clone();
            let directory = Arc::clone(directory);
            let id = args.lookup.id;
            let settings = args.lookup.settings(defaults);
            tokio::spawn(async move { get_or_set(&stack, &directory, settings, id).await })
        })
        .collect();

    let mut profile = None;
    let mut failures = 0;
    for result in join_all(handles).await {
        match result? {
            Ok(value) => profile = Some(value),
            Err(e) => {
                warn!("Lookup failed: {}", e);
                failures += 1;
            }
        }
    }

    let layers: Vec<_> = stack
        .layers()
        .iter()
        .map(|layer| {
            json!({
                "name": layer.name(),
                "available": layer.is_available(),
                "stats": layer.stats(),
            })
        })
        .collect();

    print_json(&json!({
        "profile": profile,
        "callers": args.concurrency,
        "failures": failures,
        "directory_lookups": directory.lookups(),
        "metrics": stack.metrics(),
        "layers": layers,
    }))
}

async fn run(
    command: Commands,
    stack: &CacheStack<UserProfile>,
    directory: &Arc<UserDirectory>,
    defaults: CacheSettings,
) -> Result<()> {
    match command {
        Commands::GetOrSet(args) => {
            let profile = get_or_set(stack, directory, args.settings(defaults), args.id).await?;
            print_json(&profile)?;
        }
        Commands::Get(args) => match stack.get(&cache_key(args.id)).await? {
            Some(entry) => print_json(&json!({
                "value": entry.value(),
                "expiry": entry.expiry(),
                "stale_after": entry.stale_after(),
            }))?,
            None => println!("miss"),
        },
        Commands::Evict(args) => {
            stack.evict(&cache_key(args.id)).await?;
            println!("evicted {}", cache_key(args.id));
        }
        Commands::Flush => {
            stack.flush().await?;
            println!("flushed {} layers", stack.layers().len());
        }
        Commands::Cleanup => {
            let report = stack.cleanup().await;
            let failures: Vec<_> = report
                .failures
                .iter()
                .map(|(layer, e)| json!({ "layer": layer, "error": e.to_string() }))
                .collect();
            print_json(&json!({ "removed": report.removed, "failures": failures }))?;
        }
        Commands::Demo(args) => demo(stack, directory, args, defaults).await?,
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_tracing(&config.logging);

    info!("stackcache {}", env!("CARGO_PKG_VERSION"));
    info!(
        "Layers: {}",
        config
            .layers
            .iter()
            .map(|layer| layer.kind())
            .collect::<Vec<_>>()
            .join(" -> ")
    );

    let stack = build_stack(&config)
        .await
        .context("failed to build cache stack")?;
    let directory = Arc::new(UserDirectory::new(cli.latency));

    let outcome = tokio::select! {
        outcome = run(cli.command, &stack, &directory, config.stack.default_settings()) => outcome,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            Ok(())
        }
    };

    stack.shutdown().await;
    outcome
}
