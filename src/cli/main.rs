use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use flux_forge::ai::{FalService, GroqService, PromptEnhancer};
use flux_forge::config::Config;
use flux_forge::params::{self, Dimensions, GenerationParams, Lora, Orientation};
use flux_forge::pipeline;
use flux_forge::png::{PARAMETERS_KEYWORD, TextChunk};

#[derive(Parser, Debug)]
#[command(
    name = "flux-forge",
    version,
    about = "Generate images with hosted FLUX models and embed the generation parameters in the PNG"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (default: config.json next to binary)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Initialize a default config.json and exit
    #[arg(long)]
    init: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate images and save them as PNGs with embedded parameters
    Generate {
        /// Text prompt
        #[arg(short, long)]
        prompt: String,

        /// Seed (0-999999); random when omitted
        #[arg(short, long)]
        seed: Option<u64>,

        /// Image size as WIDTHxHEIGHT
        #[arg(long, value_name = "WxH", conflicts_with = "orientation")]
        size: Option<Dimensions>,

        /// portrait, square or landscape (picks the preset size)
        #[arg(long)]
        orientation: Option<Orientation>,

        /// LoRA adapter as PATH or PATH:SCALE (repeatable)
        #[arg(long = "lora", value_name = "PATH[:SCALE]", conflicts_with = "no_lora")]
        loras: Vec<Lora>,

        /// Generate without the default LoRA adapters
        #[arg(long)]
        no_lora: bool,

        /// Number of images to generate
        #[arg(short = 'n', long)]
        num_images: Option<u32>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Enhance the prompt with the chat provider before generating
        #[arg(long)]
        enhance: bool,

        /// Call the providers but write no files
        #[arg(long)]
        dry_run: bool,
    },

    /// Rewrite a short prompt into a detailed one
    Enhance {
        /// Prompt to enhance
        prompt: String,
    },

    /// Embed a tEXt chunk into an existing PNG file
    Embed {
        /// PNG file to modify
        file: PathBuf,

        /// tEXt keyword
        #[arg(short, long, default_value = PARAMETERS_KEYWORD)]
        keyword: String,

        /// Text to embed
        #[arg(long)]
        value: String,

        /// Write to this file instead of modifying FILE in place
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Skip the .bak backup when modifying in place
        #[arg(long)]
        no_backup: bool,
    },

    /// List the tEXt chunks in PNG files
    Inspect {
        /// PNG files to read
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Handle --init
    if cli.init {
        let config = Config::default();
        let path = cli.config.as_deref();
        config.save(path)?;
        let save_path = match path {
            Some(p) => p.to_path_buf(),
            None => Config::config_path()?,
        };
        println!("Default config written to {}", save_path.display());
        return Ok(());
    }

    let Some(command) = cli.command else {
        anyhow::bail!("No command given. Use --help for usage.");
    };

    // Load config
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env();

    match command {
        Command::Generate {
            prompt,
            seed,
            size,
            orientation,
            loras,
            no_lora,
            num_images,
            out,
            enhance,
            dry_run,
        } => {
            if dry_run {
                config.output.dry_run = true;
            }
            if config.providers.fal.api_key.is_empty() {
                anyhow::bail!(
                    "No fal API key configured. Run `flux-forge-cli --init` to create a config file, then add your key (or set FAL_KEY)."
                );
            }

            let prompt = if enhance {
                enhance_prompt(&config, &prompt).await?
            } else {
                prompt
            };

            let dimensions = match (size, orientation) {
                (Some(size), _) => size,
                (None, Some(o)) => o.default_dimensions(),
                (None, None) => config.defaults.dimensions,
            };
            if !dimensions.is_preset() {
                log::warn!("{dimensions} is not a preset resolution; the provider may adjust it");
            }

            let params = GenerationParams {
                prompt,
                seed: seed.unwrap_or_else(params::random_seed),
                dimensions,
                loras: if no_lora {
                    Vec::new()
                } else if loras.is_empty() {
                    config.defaults.loras.clone()
                } else {
                    loras
                },
                model: config.providers.fal.model.clone(),
                num_images: num_images.unwrap_or(config.defaults.num_images),
            };

            let out_dir = out.unwrap_or_else(|| config.output.dir.clone());
            if config.output.dry_run {
                log::info!("DRY RUN: no files will be written");
            }

            let service = FalService::new(config.providers.fal.clone());
            let client = reqwest::Client::new();
            let result = pipeline::generate_images(
                &service,
                &client,
                &params,
                &out_dir,
                config.output.dry_run,
            )
            .await?;

            for (i, error) in &result.failed {
                log::error!("Image {} was not saved: {error}", i + 1);
            }
            if result.unembedded > 0 {
                log::warn!(
                    "{} image(s) saved without embedded parameters",
                    result.unembedded
                );
            }

            if cli.json {
                let json = serde_json::json!({
                    "seed": result.seed,
                    "files": result.files.iter().map(|p| p.display().to_string()).collect::<Vec<_>>(),
                    "parameters": result.metadata,
                    "unembedded": result.unembedded,
                    "failed": result.failed.iter().map(|(i, e)| serde_json::json!({ "index": i, "error": e })).collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                log::info!(
                    "Done: {} image(s), {} failed, seed {}",
                    result.files.len(),
                    result.failed.len(),
                    result.seed
                );
            }
        }

        Command::Enhance { prompt } => {
            let enhanced = enhance_prompt(&config, &prompt).await?;
            if cli.json {
                let json = serde_json::json!({ "enhancedPrompt": enhanced });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("{enhanced}");
            }
        }

        Command::Embed {
            file,
            keyword,
            value,
            output,
            no_backup,
        } => {
            let backup = config.output.backup_originals && !no_backup;
            let written = pipeline::embed_file(&file, &keyword, &value, output.as_deref(), backup)?;
            log::info!("Embedded tEXt '{keyword}' into {}", written.display());
        }

        Command::Inspect { files } => {
            let mut report = Vec::new();
            let mut failed = 0;

            for file in &files {
                match pipeline::inspect_file(file) {
                    Ok(chunks) => {
                        if !cli.json {
                            print_chunks(file, &chunks);
                        }
                        report.push(serde_json::json!({
                            "path": file.display().to_string(),
                            "text": chunks,
                        }));
                    }
                    Err(e) => {
                        failed += 1;
                        log::error!("{e:#}");
                        report.push(serde_json::json!({
                            "path": file.display().to_string(),
                            "error": format!("{e:#}"),
                        }));
                    }
                }
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            if failed > 0 {
                anyhow::bail!("{failed} of {} file(s) could not be read", files.len());
            }
        }
    }

    Ok(())
}

async fn enhance_prompt(config: &Config, prompt: &str) -> Result<String> {
    let service = GroqService::new(config.providers.groq.clone());
    log::info!("Enhancing prompt with {}...", service.name());
    let enhanced = service.enhance(prompt).await?;
    log::debug!("Enhanced prompt: {enhanced}");
    Ok(enhanced)
}

// ANSI color codes
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";

/// Print the tEXt chunks of one file.
fn print_chunks(path: &std::path::Path, chunks: &[TextChunk]) {
    println!();
    println!("{BOLD}File:{RESET} {}", path.display());
    println!("{DIM}{}{RESET}", "═".repeat(72));

    if chunks.is_empty() {
        println!("  {DIM}(no tEXt chunks found){RESET}");
        println!();
        return;
    }

    for chunk in chunks {
        for row in chunk_rows(chunk) {
            println!("{row}");
        }
    }
    println!();
}

/// Table rows for one chunk: the keyword beside the first value line, then
/// continuation lines. A chunk with an empty value still gets its keyword row.
fn chunk_rows(chunk: &TextChunk) -> Vec<String> {
    let tag_col = format!("{:<22}", chunk.keyword);
    let mut rows = Vec::new();
    for (i, line) in chunk.value.lines().enumerate() {
        if i == 0 {
            rows.push(format!("  {tag_col} : {line}"));
        } else {
            rows.push(format!("  {:<22}   {line}", ""));
        }
    }
    if rows.is_empty() {
        rows.push(format!("  {tag_col} : {DIM}(empty){RESET}"));
    }
    rows
}
