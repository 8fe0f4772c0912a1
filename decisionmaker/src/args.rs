use clap::{Parser, Subcommand};
use kinetic_common::args::AuthArgs;

#[derive(Parser, Debug)]
#[command(name = "kinetic-decisionmaker")]
#[command(about = "Per-node scheduling intent agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the decision maker server
    Server(ServerArgs),

    /// Scan the local process table and print the pod mapping
    Pids(PidsArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8085)]
    pub port: u16,

    /// Kubernetes node this agent runs on
    #[arg(long, env = "NODE_NAME", required = true)]
    pub node_name: String,

    /// Stable node identifier; defaults to the node name
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,

    /// Root of the process table
    #[arg(long, env = "PROC_ROOT", default_value = "/proc")]
    pub proc_root: String,

    /// Public key the manager must present to obtain a token
    #[arg(long, env = "CLIENT_PUBLIC_KEY", required = true)]
    pub client_public_key: String,

    #[clap(flatten)]
    pub auth: AuthArgs,

    /// Strategy cache TTL in seconds
    #[arg(long, env = "STRATEGY_CACHE_TTL_SECS", default_value_t = 300)]
    pub strategy_cache_ttl_secs: u64,

    /// Pod label cache TTL in seconds
    #[arg(long, env = "LABEL_CACHE_TTL_SECS", default_value_t = 30)]
    pub label_cache_ttl_secs: u64,

    /// Interval for the background Merkle root refresh; 0 disables it
    #[arg(long, env = "MERKLE_REFRESH_SECS", default_value_t = 0)]
    pub merkle_refresh_secs: u64,

    /// Run without cluster API access: labels come from intent snapshots
    /// and the pod watcher is disabled
    #[arg(long, env = "STANDALONE", default_value_t = false)]
    pub standalone: bool,
}

#[derive(Parser, Debug, Clone)]
pub struct PidsArgs {
    /// Root of the process table
    #[arg(long, env = "PROC_ROOT", default_value = "/proc")]
    pub proc_root: String,
}
