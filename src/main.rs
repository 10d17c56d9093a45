//! docsnap - render HTML regions to PDF, fetch documents, rasterize signatures

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use docsnap::export::download::{download, DirectorySaver, ObjectUrlRegistry};
use docsnap::export::{document_filename, paginate, pdf};
use docsnap::rendering::resources::ResourceLoader;
use docsnap::signature::{PadOptions, SignaturePad, StrokePath};
use docsnap::{capture, ExportConfig, RenderRegion, TextFont};

#[derive(Parser, Debug)]
#[command(name = "docsnap")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Export settings as JSON (filename, scale, quality, page, use_cors)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render an HTML file into a paginated PDF
    Render {
        /// HTML document to render
        input: PathBuf,
        /// CSS selector of the region; defaults to <body>
        #[arg(short, long)]
        selector: Option<String>,
        /// Region width in CSS pixels
        #[arg(short, long, default_value_t = 794)]
        width: u32,
        /// Document URL used to resolve images
        #[arg(long)]
        base_url: Option<String>,
        /// TrueType font for text
        #[arg(long, value_name = "TTF")]
        font: Option<PathBuf>,
        /// Derive the filename from this title
        #[arg(long)]
        title: Option<String>,
        /// Directory the PDF is saved into
        #[arg(short = 'd', long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Download a remote document
    Fetch {
        url: String,
        /// Name of the saved file; defaults to the last URL segment
        #[arg(short, long)]
        filename: Option<String>,
        #[arg(short = 'd', long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Rasterize recorded strokes (JSON) into a PNG signature
    Sign {
        /// JSON array of strokes
        strokes: PathBuf,
        #[arg(long, default_value_t = 400)]
        width: u32,
        #[arg(long, default_value_t = 150)]
        height: u32,
        /// PNG output path
        #[arg(short, long, default_value = "signature.png")]
        output: PathBuf,
        /// Print the data URL instead of writing a file
        #[arg(long)]
        data_url: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<ExportConfig> {
    match path {
        Some(p) => ExportConfig::from_json_file(p)
            .with_context(|| format!("loading config {}", p.display())),
        None => Ok(ExportConfig::default()),
    }
}

#[cfg(feature = "remote")]
fn image_loader() -> Result<Box<dyn ResourceLoader>> {
    Ok(Box::new(docsnap::rendering::resources::HttpLoader::new(30_000)?))
}

#[cfg(not(feature = "remote"))]
fn image_loader() -> Result<Box<dyn ResourceLoader>> {
    Ok(Box::new(docsnap::ResourceCache::new()))
}

#[allow(clippy::too_many_arguments)]
fn render(
    config: ExportConfig,
    input: PathBuf,
    selector: Option<String>,
    width: u32,
    base_url: Option<String>,
    font: Option<PathBuf>,
    title: Option<String>,
    out_dir: PathBuf,
) -> Result<()> {
    let html = fs::read_to_string(&input).with_context(|| format!("reading {}", input.display()))?;
    let mut region = RenderRegion::new(html, width);
    if let Some(sel) = selector {
        region = region.with_selector(sel);
    }
    if let Some(base) = base_url.as_deref() {
        region = region.with_base_url(base)?;
    }

    let mut options = config.capture_options();
    if let Some(path) = font {
        let bytes = fs::read(&path).with_context(|| format!("reading font {}", path.display()))?;
        options.font = Some(TextFont::from_bytes(bytes)?);
    }
    let filename = match title {
        Some(t) => document_filename(&t),
        None => config.filename.clone(),
    };

    let loader = image_loader()?;
    let bitmap = capture(&region, &options, loader.as_ref())?;
    let artifact = paginate(bitmap, config.page, &filename);
    let blob = pdf::serialize(&artifact, config.jpeg_quality())?;

    let registry = ObjectUrlRegistry::new();
    let path = download(&registry, &DirectorySaver::new(out_dir), blob, &filename)?;
    info!("Wrote {} ({} page(s))", path.display(), artifact.page_count());
    Ok(())
}

#[cfg(feature = "remote")]
fn fetch(url: String, filename: Option<String>, out_dir: PathBuf) -> Result<()> {
    let filename = filename.unwrap_or_else(|| {
        let last = url.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
        docsnap::export::sanitize_filename(last.split(['?', '#']).next().unwrap_or_default())
    });
    let client = reqwest::blocking::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .context("building HTTP client")?;
    let registry = ObjectUrlRegistry::new();
    let path = docsnap::download_from_url(
        &client,
        &registry,
        &DirectorySaver::new(out_dir),
        &url,
        &filename,
    )?;
    info!("Saved {} to {}", url, path.display());
    Ok(())
}

#[cfg(not(feature = "remote"))]
fn fetch(url: String, _filename: Option<String>, _out_dir: PathBuf) -> Result<()> {
    anyhow::bail!("cannot fetch {}: built without the `remote` feature", url)
}

fn sign(strokes: PathBuf, width: u32, height: u32, output: PathBuf, data_url: bool) -> Result<()> {
    let json = fs::read_to_string(&strokes).with_context(|| format!("reading {}", strokes.display()))?;
    let paths: Vec<StrokePath> = serde_json::from_str(&json).context("parsing strokes")?;

    let mut pad = SignaturePad::new(PadOptions::default())?;
    pad.open(width, height)?;
    pad.load_strokes(paths);
    let image = pad.export()?;
    pad.close();

    if data_url {
        println!("{}", image.to_data_url());
    } else {
        fs::write(&output, &image.png).with_context(|| format!("writing {}", output.display()))?;
        info!("Wrote {}x{} signature to {}", image.width, image.height, output.display());
    }
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_ref())?;
    match cli.command {
        Command::Render {
            input,
            selector,
            width,
            base_url,
            font,
            title,
            out_dir,
        } => render(config, input, selector, width, base_url, font, title, out_dir),
        Command::Fetch {
            url,
            filename,
            out_dir,
        } => fetch(url, filename, out_dir),
        Command::Sign {
            strokes,
            width,
            height,
            output,
            data_url,
        } => sign(strokes, width, height, output, data_url),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        match err.downcast_ref::<docsnap::Error>() {
            Some(e) => eprintln!("docsnap: {:?}: {:#}", e.category(), err),
            None => eprintln!("docsnap: {:#}", err),
        }
        std::process::exit(1);
    }
}
