//! onsc: sign and verify survey data files and their certificates
//!
//! Commands:
//!   sign-file <file> --id <n>                     - embed a signature trailer in <file>
//!   verify-file <file> --cert <cert> --id <n>     - check <file> against a holder certificate
//!   generate-certificate <out> --name ..          - new key pair and unsigned certificate
//!   sign-certificate <cert> --authority <cert>    - authority signs a user certificate
//!   verify-certificate <cert> --authority <cert>  - check a user certificate's signature
//!   config show                                   - display current configuration
//!
//! Exit status is 0 on success or a valid signature, 1 otherwise.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};

use onsc_cert::{
    build_certificate, read_certificate, write_certificate, FileKeySource, FileToken,
    SecretKeySource, TokenKeySource, TrustContext, User,
};
use onsc_core::{CertificateFormat, KeystoreKind, OnscConfig, OnscError, SequenceId};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "onsc",
    version,
    about = "OpenNavigationSurface signing tool",
    long_about = "onsc: embed and check digital signatures in data files under a simple chain of trust"
)]
struct Cli {
    /// Path to onsc.toml configuration file
    #[arg(long, short = 'c', env = "ONSC_CONFIG", default_value = "onsc.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "ONSC_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "ONSC_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    /// Read and write plain-text certificates instead of XML
    #[arg(long, global = true)]
    text: bool,

    /// Keep secret keys on the key token image instead of in a key file
    #[arg(long, global = true)]
    token: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign a data file, writing or replacing its signature trailer
    #[command(name = "sign-file")]
    SignFile {
        /// File to sign in place
        file: PathBuf,
        /// Sequence ID bound into the signature
        #[arg(long)]
        id: u32,
        /// Secret key file or token image (overrides config)
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
    },

    /// Verify a data file's signature trailer against the signer's certificate
    #[command(name = "verify-file")]
    VerifyFile {
        file: PathBuf,
        /// Certificate of the key holder who signed the file
        #[arg(long)]
        cert: PathBuf,
        /// Expected sequence ID
        #[arg(long)]
        id: u32,
    },

    /// Generate a key pair and write an unsigned certificate for it
    ///
    /// The secret key is wrapped under a pass-phrase (ONSC_PASSPHRASE or prompt)
    /// and stored in the key file or token image.
    #[command(name = "generate-certificate")]
    GenerateCertificate {
        /// Certificate file to write
        out: PathBuf,
        #[arg(long)]
        name: String,
        #[arg(long)]
        organization: String,
        /// Non-zero user ID
        #[arg(long = "user-id")]
        user_id: u32,
        /// Where the holder's secret key is kept (recorded in the certificate)
        #[arg(long)]
        keysource: String,
        /// Secret key file or token image (overrides config)
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
    },

    /// Sign a user certificate with an authority's key
    #[command(name = "sign-certificate")]
    SignCertificate {
        /// User certificate to sign
        cert: PathBuf,
        /// Authority certificate
        #[arg(long)]
        authority: PathBuf,
        /// Authority secret key file or token image (overrides config)
        #[arg(long, short = 'k')]
        key: Option<PathBuf>,
        /// Write the signed certificate here instead of in place
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },

    /// Verify that a user certificate was signed by an authority
    #[command(name = "verify-certificate")]
    VerifyCertificate {
        cert: PathBuf,
        #[arg(long)]
        authority: PathBuf,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return report(&e),
    };
    init_logging(&cli, &config);
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "onsc starting"
    );

    match run(&cli, &config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => report(&e),
    }
}

/// Print `error: <kind>: <message>` and pick the failure status.
fn report(e: &anyhow::Error) -> ExitCode {
    let kind = e
        .chain()
        .find_map(|cause| cause.downcast_ref::<OnscError>())
        .map_or_else(|| "error".to_string(), |o| o.kind().to_string());
    eprintln!("error: {kind}: {e:#}");
    ExitCode::FAILURE
}

fn run(cli: &Cli, config: &OnscConfig) -> Result<bool> {
    let ctx = TrustContext::from_config(config);
    match &cli.command {
        Commands::SignFile { file, id, key } => {
            cmd_sign_file(&ctx, config, file, *id, key.as_deref())
        }
        Commands::VerifyFile { file, cert, id } => cmd_verify_file(&ctx, file, cert, *id),
        Commands::GenerateCertificate {
            out,
            name,
            organization,
            user_id,
            keysource,
            key,
        } => {
            let user = User::new(name.as_str(), organization.as_str(), *user_id, keysource.as_str());
            cmd_generate_certificate(&ctx, config, &user, out, key.as_deref())
        }
        Commands::SignCertificate {
            cert,
            authority,
            key,
            out,
        } => cmd_sign_certificate(&ctx, config, cert, authority, key.as_deref(), out.as_deref()),
        Commands::VerifyCertificate { cert, authority } => {
            cmd_verify_certificate(&ctx, cert, authority)
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(config, &cli.config),
    }
}

fn load_config(cli: &Cli) -> Result<OnscConfig> {
    let mut config = OnscConfig::load(&cli.config)
        .with_context(|| format!("loading config: {}", cli.config.display()))?;
    if cli.text {
        config.certificate.format = CertificateFormat::Text;
    }
    if cli.token {
        config.keystore.kind = KeystoreKind::Token;
    }
    Ok(config)
}

fn init_logging(cli: &Cli, config: &OnscConfig) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = cli.log.as_deref().unwrap_or(&config.logging.level);
    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Secret keys ───────────────────────────────────────────────────────────────

/// The configured secret key store, optionally at an explicit path.
fn key_source(config: &OnscConfig, path: Option<&Path>) -> Box<dyn SecretKeySource> {
    match config.keystore.kind {
        KeystoreKind::File => {
            let path = path.unwrap_or(&config.keystore.secret_key_file);
            Box::new(FileKeySource::new(path))
        }
        KeystoreKind::Token => {
            let path = path.unwrap_or(&config.keystore.token_image);
            Box::new(TokenKeySource::new(FileToken::new(path)))
        }
    }
}

/// Pass-phrase from ONSC_PASSPHRASE, or prompted on the terminal.
fn passphrase(prompt: &str) -> Result<SecretString> {
    if let Ok(phrase) = std::env::var("ONSC_PASSPHRASE") {
        return Ok(SecretString::from(phrase));
    }
    let phrase = rpassword::prompt_password(prompt).context("reading pass-phrase")?;
    Ok(SecretString::from(phrase))
}

// ── `onsc sign-file` / `onsc verify-file` ─────────────────────────────────────

fn cmd_sign_file(
    ctx: &TrustContext,
    config: &OnscConfig,
    file: &Path,
    id: u32,
    key: Option<&Path>,
) -> Result<bool> {
    let source = key_source(config, key);
    let phrase = passphrase("Signing key pass-phrase: ")?;
    ctx.sign_file(file, &*source, &phrase, SequenceId(id))
        .with_context(|| format!("signing {}", file.display()))?;
    println!("{}: signed (sequence ID {})", file.display(), SequenceId(id));
    Ok(true)
}

fn cmd_verify_file(ctx: &TrustContext, file: &Path, cert: &Path, id: u32) -> Result<bool> {
    let (signer, _) = read_certificate(cert, ctx.format)
        .with_context(|| format!("reading certificate {}", cert.display()))?;
    let valid = ctx
        .verify_file(file, &signer, SequenceId(id))
        .with_context(|| format!("verifying {}", file.display()))?;
    print_verdict(file, valid);
    Ok(valid)
}

// ── Certificates ──────────────────────────────────────────────────────────────

fn cmd_generate_certificate(
    ctx: &TrustContext,
    config: &OnscConfig,
    user: &User,
    out: &Path,
    key: Option<&Path>,
) -> Result<bool> {
    let mut cert = build_certificate(user)?;
    let mut store = key_source(config, key);
    let phrase = passphrase("New key pass-phrase: ")?;
    ctx.issue_keys(&mut cert, &phrase, &mut *store)
        .with_context(|| format!("issuing keys for {}", user))?;
    write_certificate(out, &cert, ctx.format)
        .with_context(|| format!("writing certificate {}", out.display()))?;
    info!(certificate = %out.display(), "certificate generated");
    println!("{}: unsigned certificate for {}", out.display(), user);
    Ok(true)
}

fn cmd_sign_certificate(
    ctx: &TrustContext,
    config: &OnscConfig,
    cert_path: &Path,
    authority_path: &Path,
    key: Option<&Path>,
    out: Option<&Path>,
) -> Result<bool> {
    let (mut cert, _) = read_certificate(cert_path, ctx.format)
        .with_context(|| format!("reading certificate {}", cert_path.display()))?;
    let (authority, _) = read_certificate(authority_path, ctx.format)
        .with_context(|| format!("reading authority {}", authority_path.display()))?;

    let source = key_source(config, key);
    let phrase = passphrase("Authority key pass-phrase: ")?;
    ctx.sign_certificate(&mut cert, &authority, &*source, &phrase)
        .with_context(|| format!("signing {}", cert_path.display()))?;

    let out = out.unwrap_or(cert_path);
    write_certificate(out, &cert, ctx.format)
        .with_context(|| format!("writing certificate {}", out.display()))?;
    println!("{}: signed by {}", out.display(), authority.user);
    Ok(true)
}

fn cmd_verify_certificate(ctx: &TrustContext, cert_path: &Path, authority_path: &Path) -> Result<bool> {
    let (cert, source) = read_certificate(cert_path, ctx.format)
        .with_context(|| format!("reading certificate {}", cert_path.display()))?;
    let (authority, _) = read_certificate(authority_path, ctx.format)
        .with_context(|| format!("reading authority {}", authority_path.display()))?;
    let valid = ctx
        .verify_certificate(&cert, &source, &authority)
        .with_context(|| format!("verifying {}", cert_path.display()))?;
    print_verdict(cert_path, valid);
    Ok(valid)
}

fn print_verdict(path: &Path, valid: bool) {
    if valid {
        println!("{}: signature valid", path.display());
    } else {
        eprintln!("{}: signature INVALID", path.display());
    }
}

// ── `onsc config show` ────────────────────────────────────────────────────────

fn cmd_config_show(config: &OnscConfig, config_path: &Path) -> Result<bool> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(true)
}
