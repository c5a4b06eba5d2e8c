// edgelink: RFCOMM provisioning daemon and key tooling
//
// `serve` runs the provisioning server on the local Bluetooth adapter. The
// remaining commands manage the device key and help test phone clients.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use edgelink_core::adapter::{adapter_name, service_uuid};
use edgelink_core::crypto::{encode_base64, encrypt_oaep_sha256};
use edgelink_core::identity::{public_key_from_pem, verify_signature, DEFAULT_KEY_BITS};
use edgelink_core::message::{encode_request, parse_response};
use edgelink_core::{DeviceIdentity, DeviceKeys, KeyStore, MessageType, ProvisioningMessage};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edgelink")]
#[command(about = "EdgeLink: secure Bluetooth provisioning for edge devices", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.config/edgelink/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the provisioning server until interrupted
    Serve,
    /// Show device id, adapter name, service UUID and public key
    Identity,
    /// Generate a new device key pair
    Keygen {
        /// Replace an existing key
        #[arg(long)]
        force: bool,
    },
    /// Build an encrypted ConfigureWifi request line
    Payload {
        /// Device public key (PEM)
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long)]
        ssid: String,
        #[arg(long)]
        password: Option<String>,
        /// Control-plane address
        #[arg(long)]
        ncbip: String,
        #[arg(long)]
        msg_id: Option<String>,
        /// Print the JSON envelope instead of the base64-wrapped line
        #[arg(long)]
        plain: bool,
    },
    /// Verify the signature of a response line
    Verify {
        /// Device public key (PEM)
        #[arg(long)]
        public_key: PathBuf,
        /// Response JSON as received from the device
        response: String,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = config::Config::config_file(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve => cmd_serve(&config_path).await,
        Commands::Identity => {
            init_logging("warn", None)?;
            cmd_identity(&config_path)
        }
        Commands::Keygen { force } => {
            init_logging("warn", None)?;
            cmd_keygen(&config_path, force)
        }
        Commands::Payload {
            public_key,
            ssid,
            password,
            ncbip,
            msg_id,
            plain,
        } => {
            init_logging("warn", None)?;
            cmd_payload(&public_key, ssid, password, ncbip, msg_id, plain)
        }
        Commands::Verify {
            public_key,
            response,
        } => {
            init_logging("warn", None)?;
            cmd_verify(&public_key, &response)
        }
        Commands::Config { action } => {
            init_logging("warn", None)?;
            cmd_config(&config_path, action)
        }
    }
}

/// Install the subscriber: stderr always, plus a daily rolling file when
/// `log_dir` is set. The returned guard must live as long as the process.
fn init_logging(default_level: &str, log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, "edgelink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(guard)
}

#[cfg(target_os = "linux")]
fn load_identity(config: &config::Config) -> Result<DeviceIdentity> {
    let store = KeyStore::new(config.key_dir()?);
    Ok(DeviceIdentity::load(config.device_id.clone(), &store))
}

fn read_public_key(path: &Path) -> Result<rsa::RsaPublicKey> {
    let pem = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read public key {}", path.display()))?;
    public_key_from_pem(&pem).context("Invalid public key")
}

#[cfg(target_os = "linux")]
async fn cmd_serve(config_path: &Path) -> Result<()> {
    use edgelink_core::platform::{
        BluezAdapter, CommandRunner, LinuxRfcomm, NmcliNetwork, PingProbe, SystemRunner,
    };
    use edgelink_core::{
        Collaborators, JsonFileConfigStore, ProvisioningServer, ReconnectSignal,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    let config = config::Config::load(config_path)?;
    let _log_guard = init_logging("info", config.log_dir.as_deref())?;

    tracing::info!(
        version = edgelink_core::VERSION,
        config = %config_path.display(),
        "Starting EdgeLink provisioning server"
    );

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new().with_sudo(config.use_sudo));
    let signal = Arc::new(ReconnectSignal::new());
    let collaborators = Collaborators {
        platform: Arc::new(LinuxRfcomm::new()),
        adapter: Arc::new(BluezAdapter::new(runner.clone()).with_hci(config.hci.clone())),
        network: Arc::new(
            NmcliNetwork::new(runner.clone()).with_interface(config.wifi_interface.clone()),
        ),
        probe: Arc::new(PingProbe::new(runner)),
        store: Arc::new(JsonFileConfigStore::new(config.settings_file()?)),
        control: signal.clone(),
    };

    let server = ProvisioningServer::new(config.server_config(), load_identity(&config)?, collaborators)
        .context("Failed to create provisioning server")?;
    let settings = server.settings();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Shutdown requested");
                cancel.cancel();
            }
        });
    }

    // Stand-in consumer until the control channel runs in this process
    {
        let cancel = cancel.clone();
        let signal = signal.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = signal.wait() => match settings.current() {
                        Some(addr) => tracing::info!(%addr, "🔗 Control plane should reconnect"),
                        None => tracing::warn!("Reconnect requested without a control-plane address"),
                    },
                }
            }
        });
    }

    server.run(cancel).await.context("Provisioning server failed")?;
    Ok(())
}

#[cfg(not(target_os = "linux"))]
async fn cmd_serve(_config_path: &Path) -> Result<()> {
    anyhow::bail!("The provisioning server requires Linux with BlueZ")
}

fn cmd_identity(config_path: &Path) -> Result<()> {
    let config = config::Config::load(config_path)?;
    let did = config.device_id.as_deref();

    println!("{}", "Device Identity".bold());
    println!("  Device ID:    {}", did.unwrap_or("(none)").bright_cyan());
    println!(
        "  Adapter name: {}",
        adapter_name(edgelink_core::config::DEFAULT_NAME_PREFIX, did, &config.device_label)
            .bright_cyan()
    );
    println!("  Service UUID: {}", service_uuid(did).to_string().bright_yellow());
    println!("  Channel:      {}", config.channel);
    println!();

    let store = KeyStore::new(config.key_dir()?);
    match store.load(did) {
        Ok(keys) => {
            println!("Key file: {}", store.key_path(did).display().to_string().bright_cyan());
            println!();
            print!("{}", keys.public_key_pem().context("Failed to encode public key")?);
        }
        Err(_) => {
            println!("{} {}", "⚠️  No device key at".bright_red(), store.key_path(did).display());
            println!("  Generate one with: {}", "edgelink keygen".bright_green());
        }
    }
    Ok(())
}

fn cmd_keygen(config_path: &Path, force: bool) -> Result<()> {
    let config = config::Config::load(config_path)?;
    let did = config.device_id.as_deref();
    let store = KeyStore::new(config.key_dir()?);

    if store.exists(did) && !force {
        anyhow::bail!(
            "Key already exists at {} (use --force to replace it)",
            store.key_path(did).display()
        );
    }

    println!("Generating {}-bit RSA key...", DEFAULT_KEY_BITS);
    let keys = DeviceKeys::generate(DEFAULT_KEY_BITS).context("Key generation failed")?;
    let path = store.save(did, &keys).context("Failed to save key")?;

    println!("  {} Private key: {}", "✓".green(), path.display());
    println!();
    println!("{}", "Public key (give this to provisioning clients):".bold());
    print!("{}", keys.public_key_pem().context("Failed to encode public key")?);
    Ok(())
}

fn cmd_payload(
    public_key: &Path,
    ssid: String,
    password: Option<String>,
    ncbip: String,
    msg_id: Option<String>,
    plain: bool,
) -> Result<()> {
    let key = read_public_key(public_key)?;
    let credential = serde_json::json!({
        "SSID": ssid,
        "Password": password,
        "NCBIP": ncbip,
    });
    let ciphertext = encrypt_oaep_sha256(&key, credential.to_string().as_bytes())
        .context("Encrypting WiFi payload failed")?;

    let msg_id = msg_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let message = ProvisioningMessage::new(msg_id, MessageType::ConfigureWifi, encode_base64(&ciphertext));
    let line = encode_request(&message, !plain).context("Encoding request failed")?;

    println!("{}", line);
    Ok(())
}

fn cmd_verify(public_key: &Path, response: &str) -> Result<()> {
    let key = read_public_key(public_key)?;
    let response = parse_response(response).context("Not a response envelope")?;

    println!("{}", "Response".bold());
    println!("  MsgId:   {}", response.msg_id);
    println!("  Time:    {}", response.time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"));
    println!("  Type:    {}", response.kind.code());
    println!("  Success: {}", response.success);
    println!("  Message: {}", response.message);

    match (response.data.as_deref(), response.sign.as_deref()) {
        (Some(data), Some(sign)) => {
            verify_signature(&key, data.as_bytes(), sign).context("Signature does not match")?;
            println!("  {} Signature valid for data {:?}", "✓".green(), data);
        }
        _ => println!("  {}", "(unsigned response)".dimmed()),
    }
    Ok(())
}

fn cmd_config(config_path: &Path, action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load(config_path)?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save(config_path)?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!("  {}", config_path.display().to_string().dimmed());
            println!();

            for (key, value) in config.list() {
                println!("  {:<16} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}
