use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use handoff_core::ContinuationBase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Parser)]
#[command(
    name = "handoff-authority",
    author,
    version,
    about = "Token authority for continuing an application on another device"
)]
pub struct Cli {
    /// Address to bind the HTTP listener to.
    #[arg(long, env = "HANDOFF_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Where token records live.
    #[arg(long, env = "HANDOFF_STORE", value_enum, default_value_t = StoreBackend::Memory)]
    pub store: StoreBackend,

    /// Redis connection URI, used when `--store redis`.
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Lifetime of a freshly issued token.
    #[arg(long, env = "HANDOFF_TOKEN_TTL_SECS", default_value_t = 300)]
    pub token_ttl_secs: u64,

    /// Origin of the wizard front end; continuation links point here.
    #[arg(long, env = "HANDOFF_PUBLIC_ORIGIN", default_value = "http://localhost:3000")]
    pub public_origin: String,

    /// Grace period applied during shutdown.
    #[arg(long, env = "HANDOFF_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,

    /// Log filter directives.
    #[arg(long, env = "RUST_LOG", default_value = "info,handoff_authority=debug")]
    pub log_filter: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub store: StoreBackend,
    pub redis_url: Option<String>,
    pub token_ttl: time::Duration,
    pub public_origin: ContinuationBase,
    pub shutdown_grace: Duration,
    pub log_filter: String,
}

impl TryFrom<Cli> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let listen_addr: SocketAddr = cli
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen address: {}", cli.listen_addr))?;
        if cli.token_ttl_secs == 0 {
            bail!("token ttl must be positive");
        }
        let token_ttl = time::Duration::seconds(
            i64::try_from(cli.token_ttl_secs).context("token ttl out of range")?,
        );
        let public_origin = ContinuationBase::parse(&cli.public_origin)
            .with_context(|| format!("invalid public origin: {}", cli.public_origin))?;
        Ok(ServerConfig {
            listen_addr,
            store: cli.store,
            redis_url: cli.redis_url,
            token_ttl,
            public_origin,
            shutdown_grace: Duration::from_secs(cli.shutdown_grace_secs),
            log_filter: cli.log_filter,
        })
    }
}
