use anyhow::{Context, Result, bail};
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod};
use postgres::NoTls;
use rustls::{ClientConfig, RootCertStore, pki_types::CertificateDer};
use tokio_postgres_rustls::MakeRustlsConnect;

use crate::args::PostgresArgs;

/// Build a connection pool from CLI args. A CA cert switches the pool to
/// rustls; otherwise connections are plaintext.
pub fn create_pool(pg_args: &PostgresArgs) -> Result<Pool> {
    let mut cfg = PgConfig::new();
    cfg.host = Some(pg_args.postgres_host.clone());
    cfg.port = Some(pg_args.postgres_port);
    cfg.dbname = Some(pg_args.postgres_database.clone());
    cfg.user = Some(pg_args.postgres_username.clone());
    cfg.password = pg_args.postgres_password.clone();
    cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = match pg_args.postgres_ca_cert.as_deref() {
        Some(ca_pem) => {
            let tls = make_rustls(parse_ca_certs(ca_pem.as_bytes())?)?;
            cfg.create_pool(Some(deadpool_postgres::Runtime::Tokio1), tls)
                .context("failed to create TLS postgres pool")?
        }
        None => cfg
            .create_pool(Some(deadpool_postgres::Runtime::Tokio1), NoTls)
            .context("failed to create postgres pool")?,
    };
    Ok(pool)
}

fn make_rustls(certs: Vec<CertificateDer<'static>>) -> Result<MakeRustlsConnect> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
        let _ = roots.add(cert);
    }
    for cert in certs {
        roots.add(cert).context("failed to add CA certificate")?;
    }
    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(MakeRustlsConnect::new(config))
}

fn parse_ca_certs(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    // If it's PEM, decode all the certs; otherwise treat as raw DER
    if bytes.starts_with(b"-----BEGIN") {
        let mut rd: &[u8] = bytes;
        let mut out = Vec::new();
        for item in rustls_pemfile::read_all(&mut rd) {
            let item = item.context("failed to parse PEM bundle")?;
            if let rustls_pemfile::Item::X509Certificate(der) = item {
                out.push(der);
            }
        }
        if out.is_empty() {
            bail!("no X509 certificates found in provided PEM");
        }
        Ok(out)
    } else {
        Ok(vec![CertificateDer::from(bytes.to_vec())])
    }
}
