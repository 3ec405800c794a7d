use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ebak_core::progress::{CancelToken, Progress, ProgressEvent, Stage};
use ebak_core::{store, Engine, EngineConfig, SevenZip};

#[derive(Parser)]
#[command(name = "ebak", version, about = "Incremental, deduplicating episode backups")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args)]
struct Limits {
    /// Upper bound for one episode archive (K/M/G suffixes)
    #[arg(long, env = "EBAK_MAX_EPISODE", default_value = "2G")]
    max_episode: String,
    /// Ceiling on the bytes one run may package
    #[arg(long, env = "EBAK_MAX_TOTAL")]
    max_total: Option<String>,
    /// Glob (relative to the workspace) to leave out; repeatable
    #[arg(long)]
    exclude: Vec<String>,
}

#[derive(Subcommand)]
enum Cmd {
    /// Preview what a backup would store (no hashing, nothing written)
    Prepare {
        #[command(flatten)]
        limits: Limits,
        #[arg(long, default_value_t = false)]
        json: bool,
        workspace: PathBuf,
    },
    /// Back up changed files into episode archives under --delivery
    Run {
        #[command(flatten)]
        limits: Limits,
        #[arg(long)]
        delivery: PathBuf,
        #[arg(long, env = "EBAK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
        #[arg(long, env = "EBAK_7Z", default_value = "7z")]
        seven_zip: PathBuf,
        #[arg(long, env = "EBAK_CONCURRENCY")]
        concurrency: Option<usize>,
        #[arg(long, default_value_t = false)]
        progress: bool,
        #[arg(long, default_value_t = false)]
        json: bool,
        workspace: PathBuf,
    },
    /// Summarize the manifest recorded for a workspace
    Status {
        #[arg(long, default_value_t = false)]
        json: bool,
        workspace: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Cmd::Prepare { limits, json, workspace } => prepare(&limits, json, &workspace)?,
        Cmd::Run { limits, delivery, password, seven_zip, concurrency, progress, json, workspace } => {
            run(&limits, &delivery, password.as_deref(), seven_zip, concurrency, progress, json, &workspace)?
        }
        Cmd::Status { json, workspace } => status(json, &workspace)?,
    }
    Ok(())
}

fn parse_size(spec: &str) -> Result<u64> {
    let s = spec.trim().to_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s);
    let (num, mul) = if let Some(n) = s.strip_suffix('K') { (n, 1u64 << 10) }
        else if let Some(n) = s.strip_suffix('M') { (n, 1 << 20) }
        else if let Some(n) = s.strip_suffix('G') { (n, 1 << 30) }
        else if let Some(n) = s.strip_suffix('T') { (n, 1 << 40) }
        else { (s, 1) };
    let v: f64 = num.trim().parse().map_err(|_| anyhow!("bad size {}", spec))?;
    if !v.is_finite() || v <= 0.0 { return Err(anyhow!("size must be positive: {}", spec)); }
    Ok((v * mul as f64) as u64)
}

fn config_from(limits: &Limits) -> Result<EngineConfig> {
    let mut cfg = EngineConfig::detect()
        .with_max_episode_bytes(parse_size(&limits.max_episode).context("--max-episode")?)
        .with_exclude(limits.exclude.iter().cloned());
    if let Some(t) = &limits.max_total {
        cfg = cfg.with_max_total_bytes(parse_size(t).context("--max-total")?);
    }
    Ok(cfg)
}

fn human(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut v = bytes as f64;
    let mut u = 0;
    while v >= 1024.0 && u < UNITS.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{} B", bytes) } else { format!("{:.1} {}", v, UNITS[u]) }
}

fn report_progress(rx: Receiver<ProgressEvent>) {
    for ev in rx {
        let rate = match ev.stage {
            Stage::Scanning => format!("{:.0} files/s", ev.throughput),
            _ => format!("{}/s", human(ev.throughput as u64)),
        };
        let eta = ev.remaining.map(|d| format!("{}s", d.as_secs())).unwrap_or_else(|| "-".into());
        eprintln!("[{:>4}s] {} | {:>3}% | {} | eta {}", ev.elapsed.as_secs(), ev.stage, ev.percent as i32, rate, eta);
    }
}

fn prepare(limits: &Limits, json: bool, workspace: &Path) -> Result<()> {
    let engine = Engine::new(config_from(limits)?, Arc::new(SevenZip::default()));
    let prep = engine.prepare(workspace).with_context(|| format!("prepare {}", workspace.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prep)?);
        return Ok(());
    }
    let s = &prep.summary;
    println!("Changes: {} new, {} modified, {} deleted ({})", s.new, s.modified, s.deleted, human(s.total_bytes));
    for ep in &prep.episodes {
        println!("  {}  {:6} file(s)  ~{}", ep.id, ep.file_count, human(ep.estimated_size));
    }
    if s.is_empty() { println!("Nothing to back up"); }
    if !prep.within_limit { println!("Exceeds --max-total: execution would be refused"); }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run(limits: &Limits, delivery: &Path, password: Option<&str>, seven_zip: PathBuf, concurrency: Option<usize>, show_progress: bool, json: bool, workspace: &Path) -> Result<()> {
    let mut cfg = config_from(limits)?;
    if let Some(n) = concurrency { cfg = cfg.with_concurrency(n); }

    let (progress, listener) = if show_progress {
        let (tx, rx) = sync_channel(64);
        (Progress::new(Some(tx)), Some(thread::spawn(move || report_progress(rx))))
    } else {
        (Progress::default(), None)
    };
    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
            tracing::warn!("cannot install Ctrl-C handler: {}", e);
        }
    }

    let engine = Engine::new(cfg, Arc::new(SevenZip::new(seven_zip))).with_progress(progress).with_cancel(cancel);
    let outcome = engine.execute(workspace, delivery, password);
    drop(engine);
    if let Some(h) = listener { let _ = h.join(); }
    let exec = outcome.with_context(|| format!("backup of {}", workspace.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&exec)?);
        return Ok(());
    }
    println!("Series {}", exec.series_id);
    for ep in &exec.episodes {
        println!("  {}  {:6} file(s)  {}  {}", ep.id, ep.file_count, human(ep.size), ep.archive_path.display());
    }
    println!("Packed {} file(s), {} metadata-only, {} deleted", exec.files_packed, exec.metadata_only, exec.summary.deleted);
    if !exec.hash_failures.is_empty() {
        eprintln!("{} file(s) could not be read and will be retried next run:", exec.hash_failures.len());
        for p in &exec.hash_failures { eprintln!("  {}", p.display()); }
    }
    Ok(())
}

fn status(json: bool, workspace: &Path) -> Result<()> {
    let path = store::manifest_path(workspace);
    if !path.exists() {
        println!("No backups recorded for {}", workspace.display());
        return Ok(());
    }
    let m = store::load(workspace);
    if json {
        println!("{}", serde_json::to_string_pretty(&m)?);
        return Ok(());
    }
    let bytes: u64 = m.files.values().map(|f| f.size).sum();
    println!("Series:        {}", m.series_id);
    println!("Last episode:  {}", if m.episode_id.is_empty() { "-" } else { m.episode_id.as_str() });
    println!("Recorded at:   {}", m.created_at.to_rfc3339());
    println!("Files:         {} ({})", m.files.len(), human(bytes));
    println!("Unique hashes: {}", m.hash_to_file.len());
    println!("Directories:   {}", m.directories.len());
    Ok(())
}
