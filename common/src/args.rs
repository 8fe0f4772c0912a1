use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct PostgresArgs {
    #[arg(long, env = "POSTGRES_HOST", default_value = "localhost")]
    pub postgres_host: String,

    #[arg(long, env = "POSTGRES_PORT", default_value_t = 5432)]
    pub postgres_port: u16,

    #[arg(long, env = "POSTGRES_DATABASE", default_value = "postgres")]
    pub postgres_database: String,

    #[arg(long, env = "POSTGRES_USERNAME", default_value = "postgres")]
    pub postgres_username: String,

    #[arg(long, env = "POSTGRES_PASSWORD")]
    pub postgres_password: Option<String>,

    /// Inline PEM bundle for the database CA, if TLS is required
    #[arg(long, env = "POSTGRES_CA_CERT")]
    pub postgres_ca_cert: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct AuthArgs {
    /// HS256 secret used to sign and verify bearer tokens
    #[arg(long, env = "JWT_SECRET", required = true)]
    pub jwt_secret: String,

    /// Lifetime of issued tokens, in seconds
    #[arg(long, env = "TOKEN_TTL_SECS", default_value_t = 3600)]
    pub token_ttl_secs: i64,
}

/// Client-side TLS material for talking to decision makers. All three
/// paths must be present for mTLS; leaving them unset keeps plain HTTP(S).
#[derive(Parser, Debug, Clone)]
pub struct DmTlsArgs {
    /// CA certificate (PEM file) that signed the decision maker certs
    #[arg(long, env = "DM_CA_CERT_PATH")]
    pub dm_ca_cert_path: Option<String>,

    /// Client certificate (PEM file) presented to decision makers
    #[arg(long, env = "DM_CLIENT_CERT_PATH")]
    pub dm_client_cert_path: Option<String>,

    /// Client private key (PEM file) matching the client certificate
    #[arg(long, env = "DM_CLIENT_KEY_PATH")]
    pub dm_client_key_path: Option<String>,
}

impl DmTlsArgs {
    pub fn is_mutual(&self) -> bool {
        self.dm_ca_cert_path.is_some()
            && self.dm_client_cert_path.is_some()
            && self.dm_client_key_path.is_some()
    }
}
