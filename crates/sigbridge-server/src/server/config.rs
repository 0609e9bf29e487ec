use anyhow::{Context, bail};
use clap::Parser;
use core::time::Duration;
use sigbridge_core::{
    address::ContextAddress,
    types::{DEFAULT_CHUNK_BYTES, DEFAULT_MAX_MESSAGE_BYTES, encoded_chunk_ceiling},
};
use std::path::PathBuf;

/// Runtime configuration for the `sigbridge-server` binary.
///
/// Every value can be set from the command line or the environment (including
/// a `.env` file in the working directory).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "sigbridge-server",
    version,
    about = "Background host relaying wallet signing requests between isolated contexts"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "127.0.0.1:50051" or "/tmp/sigbridge.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("127.0.0.1:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Upper bound on the payload of one data or tag chunk, in bytes.
    ///
    /// Its JSON encoding must fit within `MAX_MESSAGE_BYTES`.
    ///
    /// Environment variable: `CHUNK_BYTES`
    #[arg(long, env = "CHUNK_BYTES", default_value_t = DEFAULT_CHUNK_BYTES)]
    pub chunk_bytes: usize,

    /// Largest encoded message the bridge accepts, in bytes.
    ///
    /// Environment variable: `MAX_MESSAGE_BYTES`
    #[arg(long, env = "MAX_MESSAGE_BYTES", default_value_t = DEFAULT_MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,

    /// Deadline for a whole signing call, in seconds.
    ///
    /// Environment variable: `SIGN_TIMEOUT_SECS`
    #[arg(long, env = "SIGN_TIMEOUT_SECS", default_value_t = 60)]
    pub sign_timeout_secs: u64,

    /// How long to wait for the authentication popup to answer, in seconds.
    ///
    /// Environment variable: `AUTH_TIMEOUT_SECS`
    #[arg(long, env = "AUTH_TIMEOUT_SECS", default_value_t = 55)]
    pub auth_timeout_secs: u64,

    /// Context address of the authentication popup.
    ///
    /// Environment variable: `AUTH_DESTINATION`
    #[arg(long, env = "AUTH_DESTINATION", default_value_t = String::from("popup"))]
    pub auth_destination: String,

    /// JSON file holding wallets, permissions and gateway config. Without it
    /// the host starts with no wallets.
    ///
    /// Environment variable: `WALLET_FILE`
    #[arg(long, env = "WALLET_FILE")]
    pub wallet_file: Option<PathBuf>,

    /// Capacity of each attached context's outbound queue.
    ///
    /// Environment variable: `ENDPOINT_BUFFER_SIZE`
    #[arg(long, env = "ENDPOINT_BUFFER_SIZE", default_value_t = 64)]
    pub endpoint_buffer_size: usize,

    /// How long shutdown waits for in-flight calls, in seconds.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT_SECS`
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECS", default_value_t = 10)]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub chunk_bytes: usize,
    pub max_message_bytes: usize,
    pub sign_timeout: Duration,
    pub auth_timeout: Duration,
    pub auth_destination: ContextAddress,
    pub wallet_file: Option<PathBuf>,
    pub endpoint_buffer_size: usize,
    pub shutdown_timeout: Duration,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.chunk_bytes == 0 {
            bail!("CHUNK_BYTES must be greater than 0");
        }

        let ceiling = encoded_chunk_ceiling(args.chunk_bytes)
            .ok_or_else(|| anyhow::anyhow!("Overflow in encoded chunk size computation"))?;
        if ceiling > args.max_message_bytes {
            bail!(
                "CHUNK_BYTES ({}) encodes to up to {} bytes, above MAX_MESSAGE_BYTES ({})",
                args.chunk_bytes,
                ceiling,
                args.max_message_bytes
            );
        }

        if args.sign_timeout_secs == 0 {
            bail!("SIGN_TIMEOUT_SECS must be greater than 0");
        }
        if args.auth_timeout_secs == 0 {
            bail!("AUTH_TIMEOUT_SECS must be greater than 0");
        }
        if args.endpoint_buffer_size == 0 {
            bail!("ENDPOINT_BUFFER_SIZE must be greater than 0");
        }

        let auth_destination: ContextAddress = args
            .auth_destination
            .parse()
            .with_context(|| format!("invalid AUTH_DESTINATION {:?}", args.auth_destination))?;
        if auth_destination.is_background() {
            bail!("AUTH_DESTINATION cannot be the background context");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            chunk_bytes: args.chunk_bytes,
            max_message_bytes: args.max_message_bytes,
            sign_timeout: Duration::from_secs(args.sign_timeout_secs),
            auth_timeout: Duration::from_secs(args.auth_timeout_secs),
            auth_destination,
            wallet_file: args.wallet_file,
            endpoint_buffer_size: args.endpoint_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout_secs),
        })
    }
}
