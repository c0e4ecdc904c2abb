use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lumen_contracts::events::EventWriter;
use lumen_contracts::media::{GenerationRequest, ReferenceImage};
use lumen_contracts::models::ResolutionTier;
use lumen_contracts::settings::{SettingsFile, API_KEY_SETTING};
use lumen_engine::cancel::CancelToken;
use lumen_engine::config::{settings_path, EngineConfig};
use lumen_engine::credentials::{
    CredentialSelector, CredentialSource, EnvThenSettings, StaticCredential,
};
use lumen_engine::provider::GeneratedImage;
use lumen_engine::{default_provider_registry, GenerationEngine};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "lumen", version, about = "Gemini prompt, image, video and search client")]
struct Cli {
    /// Provider backend (`gemini` or the offline `dryrun`).
    #[arg(long, global = true, env = "LUMEN_PROVIDER", default_value = "gemini")]
    provider: String,
    /// Append activity events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Rewrite a rough idea into a polished prompt.
    Prompt(PromptArgs),
    /// Generate a single-file React component.
    AppCode(AppCodeArgs),
    Image(MediaArgs),
    Video(VideoArgs),
    /// Grounded web search; prints a JSON result list.
    Search(SearchArgs),
    /// Manage the stored API key.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Debug, Parser)]
struct PromptArgs {
    idea: String,
    #[arg(long, default_value = "Professional")]
    tone: String,
    #[arg(long, default_value = "General")]
    category: String,
}

#[derive(Debug, Parser)]
struct AppCodeArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long = "feature")]
    features: Vec<String>,
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct MediaArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "1:1")]
    aspect_ratio: String,
    #[arg(long, default_value = "standard")]
    tier: String,
    /// Reference image to condition on.
    #[arg(long)]
    reference: Option<PathBuf>,
    /// Write the image bytes to this file or directory instead of printing a data URI.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct VideoArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "16:9")]
    aspect_ratio: String,
    #[arg(long, default_value = "standard")]
    tier: String,
    #[arg(long)]
    reference: Option<PathBuf>,
    #[arg(long)]
    duration: Option<u32>,
}

#[derive(Debug, Parser)]
struct SearchArgs {
    query: String,
}

#[derive(Debug, Subcommand)]
enum KeyAction {
    /// Store a key; prompts on stdin when omitted.
    Set { key: Option<String> },
    Status,
    Clear,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("lumen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env("LUMEN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .try_init()
        .ok();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let settings = SettingsFile::new(settings_path());
    if let Command::Key { action } = &cli.command {
        return run_key(action, &settings);
    }

    let engine = build_engine(&cli, settings)?;
    match cli.command {
        Command::Prompt(args) => {
            let optimized = engine.optimize_prompt(&args.idea, &args.tone, &args.category)?;
            println!("{optimized}");
        }
        Command::AppCode(args) => {
            let code = engine.generate_app_code(&args.name, &args.description, &args.features)?;
            match args.out {
                Some(path) => {
                    write_output(&path, code.as_bytes())?;
                    println!("{}", path.display());
                }
                None => println!("{code}"),
            }
        }
        Command::Image(args) => {
            let request = generation_request(
                &args.prompt,
                args.reference.as_deref(),
                &args.aspect_ratio,
                &args.tier,
                None,
            )?;
            let Some(image) = engine.generate_image(&request)? else {
                eprintln!("no image returned");
                return Ok(2);
            };
            match args.out {
                Some(out) => {
                    let path = image_output_path(&out, &image);
                    write_output(&path, &image.bytes)?;
                    println!("{}", path.display());
                }
                None => println!("{}", image.data_uri()),
            }
        }
        Command::Video(args) => {
            let request = generation_request(
                &args.prompt,
                args.reference.as_deref(),
                &args.aspect_ratio,
                &args.tier,
                args.duration,
            )?;
            let Some(locator) = engine.generate_video(&request, &CancelToken::new())? else {
                eprintln!("video job finished without a result");
                return Ok(2);
            };
            println!("{locator}");
        }
        Command::Search(args) => {
            let results = engine.search(&args.query);
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Key { .. } => unreachable!("key commands return early"),
    }
    Ok(0)
}

fn build_engine(cli: &Cli, settings: SettingsFile) -> Result<GenerationEngine> {
    let config = EngineConfig::from_env();
    let registry = default_provider_registry(&config);
    let Some(provider) = registry.get(&cli.provider) else {
        bail!(
            "unknown provider '{}' (available: {})",
            cli.provider,
            registry.names().join(", ")
        );
    };

    let (credentials, selector): (Arc<dyn CredentialSource>, Arc<dyn CredentialSelector>) =
        if provider.name() == "dryrun" {
            (
                Arc::new(StaticCredential::new(Some("dryrun"))),
                Arc::new(lumen_engine::credentials::NoCredentialSelector),
            )
        } else {
            (
                Arc::new(EnvThenSettings::new(Some(settings.clone()))),
                Arc::new(StdinKeySelector { settings }),
            )
        };

    let events = cli.events.as_ref().map(|path| {
        EventWriter::new(path, format!("lumen-{}", uuid::Uuid::new_v4().simple()))
    });
    info!(provider = provider.name(), "engine ready");
    Ok(GenerationEngine::new(provider, credentials, selector, config.poll).with_events(events))
}

/// Asks for a key on stdin and saves it to the settings file.
struct StdinKeySelector {
    settings: SettingsFile,
}

impl CredentialSelector for StdinKeySelector {
    fn has_selected_key(&self) -> bool {
        EnvThenSettings::new(Some(self.settings.clone()))
            .api_key()
            .is_some()
    }

    fn open_select_key(&self) -> Result<()> {
        eprint!("Gemini API key (billing-enabled project): ");
        io::stderr().flush().ok();
        let key = read_key_line()?;
        self.settings.set_string(API_KEY_SETTING, &key)?;
        eprintln!("saved to {}", self.settings.path().display());
        Ok(())
    }
}

fn run_key(action: &KeyAction, settings: &SettingsFile) -> Result<i32> {
    match action {
        KeyAction::Set { key } => {
            let key = match key {
                Some(key) if !key.trim().is_empty() => key.trim().to_string(),
                _ => {
                    eprint!("Gemini API key: ");
                    io::stderr().flush().ok();
                    read_key_line()?
                }
            };
            settings.set_string(API_KEY_SETTING, &key)?;
            println!("saved to {}", settings.path().display());
        }
        KeyAction::Status => {
            let stored = settings.get_string(API_KEY_SETTING).is_some();
            let active = EnvThenSettings::new(Some(settings.clone())).api_key().is_some();
            println!(
                "{}",
                serde_json::json!({
                    "settings_path": settings.path().display().to_string(),
                    "stored": stored,
                    "active": active,
                })
            );
        }
        KeyAction::Clear => {
            let removed = settings.remove(API_KEY_SETTING)?;
            println!("{}", if removed { "cleared" } else { "no stored key" });
        }
    }
    Ok(0)
}

fn read_key_line() -> Result<String> {
    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read API key from stdin")?;
    let key = line.trim().to_string();
    if key.is_empty() {
        bail!("no API key entered");
    }
    Ok(key)
}

fn generation_request(
    prompt: &str,
    reference: Option<&Path>,
    aspect_ratio: &str,
    tier: &str,
    duration: Option<u32>,
) -> Result<GenerationRequest> {
    let Some(tier) = ResolutionTier::parse(tier) else {
        bail!("unknown resolution tier '{tier}' (expected standard or hd)");
    };
    let reference_image = reference.map(load_reference).transpose()?;
    Ok(GenerationRequest::new(
        prompt,
        reference_image,
        aspect_ratio,
        tier,
        duration,
    )?)
}

fn load_reference(path: &Path) -> Result<ReferenceImage> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mime_type = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        other => bail!("unsupported reference image type '.{other}'"),
    };
    Ok(ReferenceImage {
        bytes,
        mime_type: mime_type.to_string(),
    })
}

/// A directory gets `image.<ext>`; a bare file name gets the image's extension.
fn image_output_path(out: &Path, image: &GeneratedImage) -> PathBuf {
    if out.is_dir() {
        return out.join(format!("image.{}", image.extension()));
    }
    if out.extension().is_none() {
        return out.with_extension(image.extension());
    }
    out.to_path_buf()
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}
