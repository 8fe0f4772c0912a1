use clap::{Parser, Subcommand};
use kinetic_common::args::{AuthArgs, DmTlsArgs, PostgresArgs};

#[derive(Parser, Debug)]
#[command(name = "kinetic-manager")]
#[command(about = "Scheduling intent control plane manager")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the manager server
    Server(ServerArgs),

    /// Obtain a bearer token
    Login(LoginArgs),

    /// Strategy operations
    Strategy(StrategyCommandArgs),

    /// Intent operations
    Intent(IntentCommandArgs),

    /// List nodes and their decision maker endpoints
    Nodes(EndpointArgs),

    /// Show the pod process mapping of one node
    Pids(PidsArgs),

    /// Check service health
    Health(EndpointArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct StrategyCommandArgs {
    #[command(subcommand)]
    pub command: StrategyCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum StrategyCommands {
    /// Create a new strategy
    Create(CreateStrategyArgs),
    /// List your strategies
    List(AuthedArgs),
    /// Delete a strategy by id
    Delete(DeleteStrategyArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct IntentCommandArgs {
    #[command(subcommand)]
    pub command: IntentCommands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum IntentCommands {
    /// List your intents
    List(AuthedArgs),
    /// Delete intents by id
    Delete(DeleteIntentsArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    #[clap(flatten)]
    pub postgres: PostgresArgs,

    #[clap(flatten)]
    pub auth: AuthArgs,

    #[clap(flatten)]
    pub dm_tls: DmTlsArgs,

    /// Operator login accepted by auth/login
    #[arg(long, env = "OPERATOR_USERNAME", default_value = "admin")]
    pub operator_username: String,

    #[arg(long, env = "OPERATOR_PASSWORD", required = true)]
    pub operator_password: String,

    /// Public key presented to decision makers during token exchange
    #[arg(long, env = "DM_PUBLIC_KEY", required = true)]
    pub dm_public_key: String,

    /// Client id presented to decision makers
    #[arg(long, env = "DM_CLIENT_ID", default_value = "manager")]
    pub dm_client_id: String,

    /// Port decision makers listen on
    #[arg(long, env = "DM_PORT", default_value_t = 8085)]
    pub dm_port: u16,

    /// Reconciler tick interval in seconds
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value_t = 30)]
    pub reconcile_interval_secs: u64,

    /// Delay before the first reconciler tick, in seconds
    #[arg(long, env = "RECONCILE_INITIAL_DELAY_SECS", default_value_t = 5)]
    pub reconcile_initial_delay_secs: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct EndpointArgs {
    /// Manager endpoint
    #[arg(long, env = "KINETIC_ENDPOINT")]
    pub endpoint: Option<String>,

    /// Bearer token (from `kinetic-manager login`)
    #[arg(long, env = "KINETIC_TOKEN")]
    pub token: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AuthedArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct LoginArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    #[arg(long)]
    pub username: String,

    #[arg(long, env = "OPERATOR_PASSWORD")]
    pub password: String,
}

#[derive(Parser, Debug, Clone)]
pub struct CreateStrategyArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Namespaces to match; empty means all
    #[arg(long = "namespace")]
    pub namespaces: Vec<String>,

    /// Label selectors as key=value pairs
    #[arg(long = "selector")]
    pub selectors: Vec<String>,

    /// Regex applied to process commands
    #[arg(long, default_value = "")]
    pub command_regex: String,

    /// Request priority scheduling
    #[arg(long, default_value_t = false)]
    pub priority: bool,

    /// Requested time slice in nanoseconds
    #[arg(long, default_value_t = 0)]
    pub execution_time: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteStrategyArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Strategy id to delete
    #[arg(long)]
    pub id: String,
}

#[derive(Parser, Debug, Clone)]
pub struct DeleteIntentsArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Intent ids to delete
    #[arg(long = "id")]
    pub ids: Vec<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct PidsArgs {
    #[clap(flatten)]
    pub endpoint: EndpointArgs,

    /// Node to inspect
    #[arg(long)]
    pub node: String,
}
