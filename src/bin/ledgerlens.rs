//! CLI binary for ledgerlens.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractionConfig`, runs one extraction cycle and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use ledgerlens::extract::inspect;
use ledgerlens::pipeline::input::load_inputs;
use ledgerlens::progress::ProgressCallback;
use ledgerlens::{
    ExtractionConfig, ExtractionOutput, ExtractionProgressCallback, Extractor, PageRasterizer,
    PdfiumRasterizer,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner whose prefix follows the stage, plus
/// one log line per normalized file.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Loading files…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_extraction_start(&self, file_count: usize) {
        self.bar.set_prefix("Rendering");
        self.bar.set_message(format!("{file_count} file(s)"));
    }

    fn on_file_normalized(&self, index: usize, name: &str, payloads: usize) {
        self.bar.println(format!(
            "  {} {:>2}. {:<32}  {}",
            green("✓"),
            index + 1,
            name,
            dim(&format!("{payloads} image(s)")),
        ));
    }

    fn on_inference_start(&self, payload_count: usize) {
        self.bar.set_prefix("Extracting");
        self.bar
            .set_message(format!("sending {payload_count} image(s) to the model…"));
    }

    fn on_extraction_complete(&self, transaction_count: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} transactions extracted",
            green("✔"),
            bold(&transaction_count.to_string())
        );
    }

    fn on_extraction_error(&self, error: &str) {
        self.bar.finish_and_clear();
        let first_line = error.lines().next().unwrap_or(error);
        eprintln!("{} {}", red("✘"), red(first_line));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one statement (Gemini, key from GEMINI_API_KEY or API_KEY)
  ledgerlens january.pdf

  # Several files in one request: PDFs and photos, in this order
  ledgerlens page1.jpg page2.jpg february.pdf

  # JSON to a file
  ledgerlens january.pdf -o january.json

  # Another provider through edgequake-llm
  ledgerlens --provider openai --model gpt-4.1 january.pdf

  # Show what would be sent, without calling the model (no API key needed)
  ledgerlens --inspect-only january.pdf

ACCEPTED FILES:
  application/pdf, image/jpeg, image/png, image/webp

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY        Google Gemini API key
  API_KEY               Fallback for GEMINI_API_KEY
  LEDGERLENS_PROVIDER   Provider when --provider is not given (default: gemini)
  LEDGERLENS_MODEL      Model when --model is not given
  PDFIUM_LIB_PATH       Path to libpdfium (file or directory)
  RUST_LOG              Log filter, overrides -v / -q
"#;

/// Extract transactions from bank statements with a vision model.
#[derive(Parser, Debug)]
#[command(
    name = "ledgerlens",
    version,
    about = "Extract transactions from bank-statement PDFs and images",
    long_about = "Render bank-statement PDFs and images, send them to a multimodal model in a \
single request, and print the extracted transactions. Uses Google Gemini by default; any \
edgequake-llm provider (OpenAI, Anthropic, Ollama, …) can be selected instead.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Statement files or HTTP/HTTPS URLs, in the order they should be read.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write JSON output to this file instead of stdout.
    #[arg(short, long, env = "LEDGERLENS_OUTPUT")]
    output: Option<PathBuf>,

    /// Print JSON (transactions + stats) instead of a table.
    #[arg(long, env = "LEDGERLENS_JSON")]
    json: bool,

    /// Provider: gemini (default), openai, anthropic, ollama, auto, …
    #[arg(long, env = "LEDGERLENS_PROVIDER")]
    provider: Option<String>,

    /// Model ID (default: gemini-2.5-flash for gemini).
    #[arg(long, env = "LEDGERLENS_MODEL")]
    model: Option<String>,

    /// Override the Gemini API base URL.
    #[arg(long, env = "LEDGERLENS_BASE_URL")]
    base_url: Option<String>,

    /// PDF render scale relative to native page size (0.5–4.0).
    #[arg(long, env = "LEDGERLENS_SCALE", default_value_t = 2.0)]
    scale: f32,

    /// JPEG quality for rendered pages (1–100).
    #[arg(long, env = "LEDGERLENS_JPEG_QUALITY", default_value_t = 80,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Number of pages rendered concurrently.
    #[arg(short, long, env = "LEDGERLENS_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "LEDGERLENS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max output tokens for the reply.
    #[arg(long, env = "LEDGERLENS_MAX_TOKENS", default_value_t = 16384)]
    max_tokens: usize,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, env = "LEDGERLENS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Inference call timeout in seconds.
    #[arg(long, env = "LEDGERLENS_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "LEDGERLENS_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Normalize only and print the payload summary; no model call.
    #[arg(long)]
    inspect_only: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "LEDGERLENS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "LEDGERLENS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "LEDGERLENS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs while the spinner is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress && !cli.inspect_only {
        let cb = CliProgressCallback::new();
        Some(cb as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb).await?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let files = load_inputs(&cli.inputs, config.download_timeout_secs)
            .await
            .context("Failed to load inputs")?;
        let rasterizer: Arc<dyn PageRasterizer> = Arc::new(PdfiumRasterizer::from_env());
        let summary = inspect(&files, Some(rasterizer), &config)
            .await
            .context("Failed to normalize inputs")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?
            );
        } else {
            for file in &summary.files {
                println!(
                    "{:<32}  {:<16}  {} image(s)",
                    file.name, file.media_type, file.payloads
                );
            }
            println!(
                "Payloads:     {} ({} bytes base64)",
                summary.payloads.len(),
                summary.total_encoded_bytes
            );
        }
        return Ok(());
    }

    // ── Run extraction ───────────────────────────────────────────────────
    let extractor = Extractor::from_config(config).context("Failed to set up the model")?;

    let output = if let Some(ref output_path) = cli.output {
        let output = extractor
            .extract_to_file(&cli.inputs, output_path)
            .await
            .context("Extraction failed")?;
        if !cli.quiet {
            eprintln!(
                "{}  {} transactions  {}ms  →  {}",
                green("✔"),
                output.transactions.len(),
                output.stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
        output
    } else {
        let output = extractor
            .extract_inputs(&cli.inputs)
            .await
            .context("Extraction failed")?;

        if cli.json {
            let json =
                serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
            println!("{json}");
        } else {
            print_table(&output).context("Failed to write to stdout")?;
        }
        output
    };

    if !cli.quiet && !cli.json {
        eprintln!(
            "   {} images  /  {} tokens in  /  {} tokens out  —  {}ms total",
            dim(&output.stats.payloads.to_string()),
            dim(&output.stats.input_tokens.to_string()),
            dim(&output.stats.output_tokens.to_string()),
            output.stats.total_duration_ms,
        );
    }

    Ok(())
}

/// Print transactions as an aligned table with a net total.
fn print_table(output: &ExtractionOutput) -> io::Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();

    for t in &output.transactions {
        let amount = format!("{:>12.2}", t.amount);
        let amount = if t.is_debit() { red(&amount) } else { green(&amount) };
        write!(handle, "{}  {}  {:<16}  {}", t.date, amount, t.category, t.description)?;
        if !t.notes.is_empty() {
            write!(handle, "  {}", dim(&format!("({})", t.notes)))?;
        }
        writeln!(handle)?;
    }

    writeln!(
        handle,
        "{}  {:>12.2}  {}",
        cyan("net       "),
        output.net_amount(),
        dim(&format!("{} transactions", output.transactions.len()))
    )
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .render_scale(cli.scale)
        .jpeg_quality(cli.jpeg_quality)
        .render_concurrency(cli.concurrency)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref url) = cli.base_url {
        builder = builder.base_url(url);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
