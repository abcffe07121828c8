use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use ogrender::rendering::{LayoutTree, RasterOptions};
use ogrender::{Capability, Deployment, Platform, RenderOutput, RenderPipeline, RendererConfig, RuntimeEnv, ScreenshotTarget, Viewport};

#[derive(Parser, Debug)]
#[command(name = "ogrender", version, about = "Render social-preview images")]
struct Cli {
    /// JSON config file; `OGRENDER_*` variables still apply on top.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Runtime platform (server, edge, browser). Defaults to `OGRENDER_PLATFORM`.
    #[arg(long, global = true)]
    platform: Option<Platform>,

    /// Development deployment: fonts come straight from the provider.
    #[arg(long, global = true, default_value_t = false)]
    dev: bool,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Typeset a layout tree JSON into SVG.
    Svg {
        tree: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Rasterize an SVG file or a layout tree JSON into PNG.
    Png {
        input: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        /// Base for relative image references. Defaults to the input's directory.
        #[arg(long)]
        base_url: Option<String>,
        /// Hex colour painted under the image.
        #[arg(long)]
        background: Option<String>,
    },
    /// Screenshot a URL or local HTML file with a headless browser.
    Screenshot {
        target: String,
        #[arg(short, long)]
        out: Option<PathBuf>,
        #[arg(long)]
        width: Option<u32>,
        #[arg(long)]
        height: Option<u32>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Run the configured browser installer.
    InstallBrowser,
    /// Resolve every capability and report the winning backend.
    Backends,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<RendererConfig> {
    let base = match path {
        Some(p) => RendererConfig::from_json_file(p)?,
        None => RendererConfig::default(),
    };
    Ok(base.from_env()?)
}

fn runtime_env(cli: &Cli) -> RuntimeEnv {
    let detected = RuntimeEnv::detect();
    RuntimeEnv::new(
        cli.platform.unwrap_or(detected.platform),
        if cli.dev { Deployment::Development } else { detected.deployment },
    )
}

fn write_output(out: Option<&Path>, default_name: &str, output: &RenderOutput) -> anyhow::Result<()> {
    let path = out.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(default_name));
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    std::fs::write(&path, &output.bytes).with_context(|| format!("write '{}'", path.display()))?;
    eprintln!("wrote {} ({}, {} bytes)", path.display(), output.mime, output.bytes.len());
    Ok(())
}

fn read_tree(path: &Path) -> anyhow::Result<LayoutTree> {
    let text = std::fs::read_to_string(path).with_context(|| format!("read '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse layout tree '{}'", path.display()))
}

fn screenshot_target(target: &str) -> anyhow::Result<ScreenshotTarget> {
    if target.contains("://") || target.starts_with("data:") {
        return Ok(ScreenshotTarget::Url(target.to_string()));
    }
    let html = std::fs::read_to_string(target).with_context(|| format!("read '{}'", target))?;
    Ok(ScreenshotTarget::Html(html))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let env = runtime_env(&cli);
    let pipeline = RenderPipeline::builder(config).env(env).build()?;

    let result = run(&pipeline, cli.cmd).await;
    if let Err(e) = pipeline.shutdown().await {
        log::warn!("browser shutdown failed: {}", e);
    }
    result
}

async fn run(pipeline: &RenderPipeline, cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Svg { tree, out } => {
            let output = pipeline.render_vector(&read_tree(&tree)?).await?;
            write_output(out.as_deref(), "og.svg", &output)
        }
        Command::Png {
            input,
            out,
            width,
            height,
            base_url,
            background,
        } => {
            let base_url = base_url.or_else(|| {
                input
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(|p| p.display().to_string())
            });
            let options = RasterOptions {
                width,
                height,
                base_url,
                background,
            };
            let output = if input.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")) {
                pipeline.render_png(&read_tree(&input)?, &options).await?
            } else {
                let svg = std::fs::read(&input).with_context(|| format!("read '{}'", input.display()))?;
                pipeline.render_raster(&svg, &options).await?
            };
            write_output(out.as_deref(), "og.png", &output)
        }
        Command::Screenshot {
            target,
            out,
            width,
            height,
            timeout_ms,
        } => {
            let default = pipeline.config().default_viewport;
            let viewport = Viewport {
                width: width.unwrap_or(default.width),
                height: height.unwrap_or(default.height),
            };
            let output = pipeline
                .render_screenshot(
                    &screenshot_target(&target)?,
                    Some(viewport),
                    timeout_ms.map(Duration::from_millis),
                )
                .await?;
            write_output(out.as_deref(), "screenshot.png", &output)
        }
        Command::InstallBrowser => {
            let report = pipeline.install_browser().await;
            match (report.exit_code, report.timed_out) {
                (_, true) => eprintln!("installer timed out"),
                (Some(0), _) => eprintln!("installer finished"),
                (Some(code), _) => eprintln!("installer exited with {}", code),
                (None, _) => eprintln!("installer did not run"),
            }
            match pipeline.browser_executable() {
                Some(p) => eprintln!("browser: {}", p.display()),
                None => eprintln!("browser: not found"),
            }
            Ok(())
        }
        Command::Backends => {
            println!("platform: {} ({:?})", pipeline.env().platform, pipeline.env().deployment);
            for capability in Capability::ALL {
                match pipeline.resolver().resolve(capability, pipeline.env()).await {
                    Ok(b) => println!("{:<10} {} ({})", capability.to_string(), b.name, b.kind),
                    Err(e) => println!("{:<10} unavailable: {}", capability.to_string(), e),
                }
            }
            Ok(())
        }
    }
}
