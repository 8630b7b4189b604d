//! objcrypt: encrypt and decrypt objects the way an object store client would
//!
//! Commands:
//!   fingerprint <pem>             - show a master key's fingerprint and strength
//!   encrypt <in> <out>            - encrypt a file, write <out>.meta.json
//!   decrypt <in> <out>            - decrypt using <in>.meta.json
//!   rekey <in> --to <pem>         - re-wrap an object's content key under a new master key
//!   checksum <file>               - print a transport checksum (ALG/bytes/hex)
//!   config show                   - display current configuration
//!
//! The JSON sidecar stands in for object metadata; nothing here talks to a
//! real store.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use objcrypt_checksum::{checksum_reader, ChecksumAlgorithm, ChecksummedReader, ChecksummedWriter};
use objcrypt_core::config::ObjcryptConfig;
use objcrypt_core::metadata::{TRANSFORM_CONFIG, WS_CHECKSUM};
use objcrypt_core::{Metadata, TransformError};
use objcrypt_crypto::keyring::check_key_size;
use objcrypt_crypto::{FactorySettings, KeyRing, MasterKeyPair, TransformFactory};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "objcrypt",
    version,
    about = "Object encryption client",
    long_about = "objcrypt: envelope-encrypt objects with RSA master keys and verify their checksums"
)]
struct Cli {
    /// Path to objcrypt.toml configuration file
    #[arg(long, short = 'c', env = "OBJCRYPT_CONFIG", default_value = "objcrypt.toml")]
    config: PathBuf,

    /// Log format (overrides logging.format in config)
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

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
    /// Show the fingerprint and strength of a PEM private key
    Fingerprint {
        /// PKCS#8 or PKCS#1 PEM file
        pem: PathBuf,
    },

    /// Encrypt a file under the active master key
    ///
    /// Writes the ciphertext to <output> and the object metadata to
    /// <output>.meta.json, then prints the ciphertext's transport checksum.
    Encrypt {
        input: PathBuf,
        output: PathBuf,
    },

    /// Decrypt a file using its <input>.meta.json sidecar
    Decrypt {
        input: PathBuf,
        output: PathBuf,
        /// Transport checksum the ciphertext must match (default: from sidecar)
        #[arg(long)]
        checksum: Option<String>,
    },

    /// Re-wrap an object's content key under a new master key
    ///
    /// The current key must be loadable from the config. Only the sidecar
    /// changes; the ciphertext is left alone.
    Rekey {
        input: PathBuf,
        /// New master key (PEM private key)
        #[arg(long)]
        to: PathBuf,
    },

    /// Print the checksum of a file
    Checksum {
        file: PathBuf,
        /// MD5, SHA1 or SHA256 (default: checksum.algorithm from config)
        #[arg(long, short = 'a')]
        algorithm: Option<String>,
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

// ── Entry point ────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ObjcryptConfig::load(&cli.config)?;

    let format = cli.log_format.clone().unwrap_or(match config.logging.format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&config.logging.level, &format);

    match cli.command {
        Commands::Fingerprint { pem } => cmd_fingerprint(&pem),
        Commands::Encrypt { input, output } => cmd_encrypt(&config, &input, &output),
        Commands::Decrypt {
            input,
            output,
            checksum,
        } => cmd_decrypt(&config, &input, &output, checksum.as_deref()),
        Commands::Rekey { input, to } => cmd_rekey(&config, &input, &to),
        Commands::Checksum { file, algorithm } => {
            cmd_checksum(&config, &file, algorithm.as_deref())
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Shared helpers ─────────────────────────────────────────────────────────────

/// Register every configured key; `keys.active_key` becomes the active one.
fn load_key_ring(config: &ObjcryptConfig) -> Result<KeyRing> {
    let ring = KeyRing::new();
    for path in &config.keys.key_files {
        let pair = MasterKeyPair::from_pem_file(path)
            .with_context(|| format!("loading key: {}", path.display()))?;
        ring.register(pair)
            .with_context(|| format!("registering key: {}", path.display()))?;
    }
    if let Some(path) = &config.keys.active_key {
        let pair = MasterKeyPair::from_pem_file(path)
            .with_context(|| format!("loading active key: {}", path.display()))?;
        ring.register_active(pair)
            .with_context(|| format!("registering active key: {}", path.display()))?;
    }
    tracing::debug!(keys = ring.len(), "key ring loaded");
    Ok(ring)
}

fn build_factory(config: &ObjcryptConfig) -> Result<TransformFactory> {
    let settings = FactorySettings::from_config(config).context("invalid [encryption] config")?;
    Ok(TransformFactory::new(settings))
}

fn transport_algorithm(config: &ObjcryptConfig, flag: Option<&str>) -> Result<ChecksumAlgorithm> {
    let name = flag.unwrap_or(&config.checksum.algorithm);
    name.parse::<ChecksumAlgorithm>()
        .with_context(|| format!("invalid checksum algorithm: {name}"))
}

/// `<object>.meta.json`
fn sidecar_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

fn read_sidecar(object: &Path) -> Result<Metadata> {
    let path = sidecar_path(object);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading metadata: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing metadata: {}", path.display()))
}

fn write_sidecar(object: &Path, metadata: &Metadata) -> Result<()> {
    let path = sidecar_path(object);
    write_atomically(&path, |out| {
        serde_json::to_writer_pretty(&mut *out, metadata).context("serializing metadata")?;
        out.write_all(b"\n")?;
        Ok(())
    })
    .with_context(|| format!("writing metadata: {}", path.display()))
}

/// Write to `<path>.partial`, renaming into place only once `fill` succeeds.
fn write_atomically<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let file = File::create(&partial)
        .with_context(|| format!("creating {}", partial.display()))?;
    let mut writer = BufWriter::new(file);
    let result = fill(&mut writer)
        .and_then(|()| writer.flush().context("flushing output"))
        .and_then(|()| {
            std::fs::rename(&partial, path)
                .with_context(|| format!("renaming {} to {}", partial.display(), path.display()))
        });
    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

// ── `objcrypt fingerprint` ─────────────────────────────────────────────────────

fn cmd_fingerprint(pem: &Path) -> Result<()> {
    let pair = MasterKeyPair::from_pem_file(pem)
        .with_context(|| format!("loading key: {}", pem.display()))?;
    let strength = check_key_size(&pair)?;
    println!("fingerprint: {}", pair.fingerprint()?);
    println!("bits:        {}", pair.modulus_bits());
    println!("strength:    {strength:?}");
    Ok(())
}

// ── `objcrypt encrypt` ─────────────────────────────────────────────────────────

fn cmd_encrypt(config: &ObjcryptConfig, input: &Path, output: &Path) -> Result<()> {
    let ring = load_key_ring(config)?;
    let factory = build_factory(config)?;
    let algorithm = transport_algorithm(config, None)?;

    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut transform = factory
        .output_transform(&ring, BufReader::new(source), Metadata::new())
        .context("starting encryption")?;

    // The ciphertext only lands at `output` once the metadata is final.
    let mut sealed = None;
    write_atomically(output, |out| {
        let mut writer = ChecksummedWriter::new(out, algorithm);
        io::copy(&mut transform, &mut writer).map_err(TransformError::from)?;
        let transport = writer.checksum();
        let mut metadata = transform.finish().context("finalizing encryption")?;
        metadata.insert(WS_CHECKSUM.into(), transport.to_string());
        sealed = Some((metadata, transport));
        Ok(())
    })?;
    let (metadata, transport) = sealed.context("encryption produced no metadata")?;
    if let Err(e) = write_sidecar(output, &metadata) {
        let _ = std::fs::remove_file(output);
        return Err(e);
    }

    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        bytes = transport.byte_count(),
        "encrypted"
    );
    println!("{WS_CHECKSUM}: {transport}");
    Ok(())
}

// ── `objcrypt decrypt` ─────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &ObjcryptConfig,
    input: &Path,
    output: &Path,
    checksum: Option<&str>,
) -> Result<()> {
    let ring = load_key_ring(config)?;
    let factory = build_factory(config)?;
    let metadata = read_sidecar(input)?;
    let tag = metadata
        .get(TRANSFORM_CONFIG)
        .with_context(|| format!("{} is not an encrypted object", input.display()))?;

    let reference = checksum.or(metadata.get(WS_CHECKSUM).map(String::as_str));
    let source = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let ciphertext = ChecksummedReader::from_reference(
        BufReader::new(source),
        reference,
        transport_algorithm(config, None)?,
    )
    .context("invalid transport checksum")?;

    let mut transform = factory
        .input_transform(&ring, tag, &metadata, ciphertext)
        .context("starting decryption")?;
    write_atomically(output, |out| {
        io::copy(&mut transform, out).map_err(TransformError::from)?;
        Ok(())
    })
    .with_context(|| format!("decrypting {}", input.display()))?;

    tracing::info!(input = %input.display(), output = %output.display(), "decrypted");
    Ok(())
}

// ── `objcrypt rekey` ───────────────────────────────────────────────────────────

fn cmd_rekey(config: &ObjcryptConfig, input: &Path, to: &Path) -> Result<()> {
    let ring = load_key_ring(config)?;
    let factory = build_factory(config)?;
    let metadata = read_sidecar(input)?;

    let new_key = MasterKeyPair::from_pem_file(to)
        .with_context(|| format!("loading key: {}", to.display()))?;
    let rekeyed = factory
        .rekey(&ring, &metadata, &new_key)
        .with_context(|| format!("rekeying {}", input.display()))?;
    write_sidecar(input, &rekeyed)?;

    println!("rekeyed {} to {}", input.display(), new_key.fingerprint()?);
    Ok(())
}

// ── `objcrypt checksum` ────────────────────────────────────────────────────────

fn cmd_checksum(config: &ObjcryptConfig, file: &Path, algorithm: Option<&str>) -> Result<()> {
    let algorithm = transport_algorithm(config, algorithm)?;
    let source = File::open(file).with_context(|| format!("opening {}", file.display()))?;
    let value = checksum_reader(BufReader::new(source), algorithm)
        .with_context(|| format!("reading {}", file.display()))?;
    println!("{value}");
    Ok(())
}

// ── `objcrypt config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &ObjcryptConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
