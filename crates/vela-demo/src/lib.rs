//! Vela Demo
//!
//! Loads a page into a QuickJS view, runs extra scripts, renders one frame
//! with the software driver and writes it to a PNG file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use vela_gpu::SoftwareDriver;
use vela_quickjs::QuickJsEngine;
use vela_view::{ConsoleLevel, Engine, EngineConfig, ScriptValue, SessionState, SurfaceFrame, ViewEvent};

pub const USAGE: &str = "usage: vela-demo <url|file> [--size WxH] [--out PATH] [--eval SCRIPT]... [--config PATH]";

/// Command line options
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    /// URL or local path of the page
    pub target: String,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
    /// Scripts run after the page loads
    pub scripts: Vec<String>,
    /// Engine configuration file (JSON)
    pub config: Option<PathBuf>,
}

impl Options {
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut args = args.into_iter();
        let mut target = None;
        let mut size = None;
        let mut output = PathBuf::from("frame.png");
        let mut scripts = Vec::new();
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--size" => {
                    let value = args.next().context("--size needs a value")?;
                    size = Some(parse_size(&value)?);
                }
                "--out" => output = args.next().context("--out needs a path")?.into(),
                "--eval" => scripts.push(args.next().context("--eval needs a script")?),
                "--config" => config = Some(args.next().context("--config needs a path")?.into()),
                flag if flag.starts_with("--") => bail!("unknown option {}\n{}", flag, USAGE),
                _ if target.is_some() => bail!("more than one page given\n{}", USAGE),
                _ => target = Some(arg),
            }
        }

        let (width, height) = size.unwrap_or((800, 600));
        Ok(Self {
            target: target.unwrap_or_else(|| "about:blank".to_string()),
            width,
            height,
            output,
            scripts,
            config,
        })
    }
}

/// `WIDTHxHEIGHT`
pub fn parse_size(value: &str) -> anyhow::Result<(u32, u32)> {
    let (width, height) = value
        .split_once(['x', 'X'])
        .with_context(|| format!("size '{}' is not WIDTHxHEIGHT", value))?;
    let width = width.trim().parse().with_context(|| format!("bad width in '{}'", value))?;
    let height = height.trim().parse().with_context(|| format!("bad height in '{}'", value))?;
    Ok((width, height))
}

/// Turn a page argument into a URL. Anything that does not parse as a URL
/// is a local path.
pub fn resolve_target(target: &str) -> anyhow::Result<String> {
    if let Ok(url) = url::Url::parse(target) {
        // A Windows drive letter parses as a scheme.
        if url.scheme().len() > 1 {
            return Ok(url.to_string());
        }
    }
    let path = std::fs::canonicalize(target).with_context(|| format!("cannot open {}", target))?;
    let url = url::Url::from_file_path(&path)
        .map_err(|_| anyhow::anyhow!("cannot make a URL from {}", path.display()))?;
    Ok(url.to_string())
}

/// What one run produced
#[derive(Debug, Clone)]
pub struct Report {
    pub url: String,
    pub title: String,
    pub state: SessionState,
    /// Results of the `--eval` scripts, in order
    pub results: Vec<ScriptValue>,
    pub frame: SurfaceFrame,
    pub output: PathBuf,
}

pub fn run(options: &Options) -> anyhow::Result<Report> {
    let mut config = match &options.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };
    config.view = config.view.with_size(options.width, options.height);
    let url = resolve_target(&options.target)?;

    let driver = SoftwareDriver::new();
    let surfaces = driver.surfaces();
    let engine = Engine::start(config, QuickJsEngine::new, driver).context("failed to start engine")?;
    let session = engine.create_default_session()?;

    let last_frame = Arc::new(Mutex::new(None));
    let paint = last_frame.clone();
    session.set_paint_handler(move |frame| {
        if let Ok(mut last) = paint.lock() {
            *last = Some(*frame);
        }
    })?;
    session.set_event_handler(log_event)?;

    tracing::info!("Loading {}", url);
    session.load_url(&url)?;

    let mut results = Vec::with_capacity(options.scripts.len());
    for script in &options.scripts {
        let value = session.run_script(script)?;
        tracing::info!("{} => {}", script, value);
        results.push(value);
    }

    engine.update()?;
    engine.render()?;

    let frame = last_frame
        .lock()
        .ok()
        .and_then(|last| *last)
        .context("the view did not paint")?;
    surfaces
        .save_png(frame.host, &options.output)
        .with_context(|| format!("failed to write {}", options.output.display()))?;
    tracing::info!(
        "Wrote {}x{} frame to {}",
        frame.width,
        frame.height,
        options.output.display()
    );

    let report = Report {
        url: session.url(),
        title: session.title(),
        state: session.state(),
        results,
        frame,
        output: options.output.clone(),
    };
    session.destroy();
    engine.shutdown();
    Ok(report)
}

fn load_config(path: &Path) -> anyhow::Result<EngineConfig> {
    let json = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    EngineConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))
}

fn log_event(event: &ViewEvent) {
    match event {
        ViewEvent::ConsoleMessage { level, message, .. } => match level {
            ConsoleLevel::Error => tracing::error!("console: {}", message),
            ConsoleLevel::Warning => tracing::warn!("console: {}", message),
            _ => tracing::info!("console: {}", message),
        },
        ViewEvent::FailLoading { description, .. } => tracing::warn!("Load failed: {}", description),
        ViewEvent::TitleChanged(title) => tracing::info!("Title: {}", title),
        other => tracing::debug!("{:?}", other),
    }
}
