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

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use stackcache_core::CacheSettings;

#[derive(Debug, Parser)]
#[command(name = "stackcache")]
#[command(about = "Multi-layer user profile cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to a TOML configuration file (environment variables otherwise)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Comma-separated layer kinds, fastest first (memory,file,redis)
    #[arg(long, global = true)]
    pub layers: Option<String>,

    /// Simulated latency of the user directory
    #[arg(
        long,
        global = true,
        value_parser = humantime::parse_duration,
        default_value = "200ms"
    )]
    pub latency: Duration,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Return the cached profile, looking it up on a miss
    GetOrSet(LookupArgs),
    /// Show the cached entry without looking anything up
    Get(IdArgs),
    /// Remove a profile from every layer
    Evict(IdArgs),
    /// Clear every layer
    Flush,
    /// Remove expired entries now
    Cleanup,
    /// Fire concurrent lookups for one user and print the metrics
    Demo(DemoArgs),
}

#[derive(Debug, clap::Args)]
pub struct IdArgs {
    /// User id
    #[arg(long)]
    pub id: i32,
}

#[derive(Debug, clap::Args)]
pub struct LookupArgs {
    /// User id
    #[arg(long)]
    pub id: i32,

    /// How long an entry lives (stack.default_ttl_secs otherwise)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// When an entry starts being refreshed in the background
    /// (stack.default_stale_secs otherwise)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub stale: Option<Duration>,
}

impl LookupArgs {
    /// Flags win over the configured defaults.
    pub fn settings(&self, defaults: CacheSettings) -> CacheSettings {
        CacheSettings::new(
            self.ttl.unwrap_or(defaults.time_to_live),
            self.stale.unwrap_or(defaults.stale_after),
        )
    }
}

#[derive(Debug, clap::Args)]
pub struct DemoArgs {
    #[command(flatten)]
    pub lookup: LookupArgs,

    /// Number of concurrent callers
    #[arg(long, default_value_t = 16)]
    pub concurrency: usize,
}
