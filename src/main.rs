use anyhow::Context;
use cardshot::prefetch::collect_image_urls;
use cardshot::{render_sync, BlockRenderer, Card, CardRenderer, HostStyle, RenderConfig, RenderOptions};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cardshot", version, about = "Render card JSON documents to PNG")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a card to a PNG file
    Render(RenderArgs),
    /// List the distinct image URLs a card would prefetch
    Urls {
        /// Card JSON file
        card: PathBuf,
    },
}

#[derive(Args)]
struct RenderArgs {
    /// Card JSON file
    card: PathBuf,
    /// Output width in pixels
    #[arg(short, long, default_value_t = cardshot::DEFAULT_WIDTH)]
    width: u32,
    /// Output PNG path
    #[arg(short, long, default_value = "card.png")]
    output: PathBuf,
    /// Host style JSON, loaded on each render worker
    #[arg(long)]
    style: Option<PathBuf>,
    /// Render worker count (defaults to the number of CPUs)
    #[arg(long)]
    workers: Option<usize>,
    /// Per-image fetch timeout in milliseconds (0 disables)
    #[arg(long, default_value_t = 30000)]
    timeout_ms: u64,
    /// Retries for failed image fetches
    #[arg(long, default_value_t = 0)]
    retries: u32,
    /// Output resolution
    #[arg(long, default_value_t = 96.0)]
    dpi: f64,
    /// Render on this thread without fetching images
    #[arg(long)]
    sync: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match cli.command {
        Command::Render(args) => render(args).await,
        Command::Urls { card } => {
            let card = Card::from_path(&card).with_context(|| format!("failed to read card {}", card.display()))?;
            for url in collect_image_urls(&card) {
                println!("{}", url);
            }
            Ok(())
        }
    }
}

async fn render(args: RenderArgs) -> anyhow::Result<()> {
    let card = Card::from_path(&args.card).with_context(|| format!("failed to read card {}", args.card.display()))?;

    let mut config = RenderConfig {
        fetch_timeout_ms: args.timeout_ms,
        fetch_retries: args.retries,
        dpi: args.dpi,
        ..Default::default()
    };
    if let Some(n) = args.workers {
        config.workers = n;
    }

    let stream = if args.sync {
        let mut renderer = match &args.style {
            Some(path) => BlockRenderer::from_style_path(path)?,
            None => BlockRenderer::new(HostStyle::default()),
        };
        render_sync(&mut renderer, &card, args.width, &RenderOptions::from(&config))?
    } else {
        let renderer = match &args.style {
            Some(path) => CardRenderer::with_style_path(&config, path)?,
            None => CardRenderer::with_style(&config, HostStyle::default())?,
        };
        renderer.render_async(card, args.width).await?
    };

    std::fs::write(&args.output, stream.into_inner())
        .with_context(|| format!("failed to write {}", args.output.display()))?;
    log::info!("wrote {}", args.output.display());
    Ok(())
}
