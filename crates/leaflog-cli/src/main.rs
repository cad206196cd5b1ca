use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use leaflog_contracts::events::EventLog;
use leaflog_contracts::plants::{growth_series, AnalysisResult, Feedback, Plant, Rating, Snapshot};
use leaflog_contracts::storage::{JsonFileStore, PlantStore};
use leaflog_engine::ingest::read_image;
use leaflog_engine::{AnalysisEngine, AnalyzerConfig, ImagePayload, ReconciledAnalysis};
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

const DEFAULT_DATA_DIR: &str = "leaflog-data";
const ANALYSIS_FAILED_MESSAGE: &str = "Failed to analyze the plant image. Please try again.";

#[derive(Debug, Parser)]
#[command(name = "leaflog", version, about = "Plant health journal")]
struct Cli {
    /// Where the plant store, event log and archived images live.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a photo and start tracking a new plant.
    Add(AddArgs),
    /// Analyze a new photo of a tracked plant.
    Snapshot(SnapshotArgs),
    List,
    Show(ShowArgs),
    Rename(RenameArgs),
    Feedback(FeedbackArgs),
    DeleteSnapshot(DeleteSnapshotArgs),
    Growth(GrowthArgs),
}

#[derive(Debug, Parser)]
struct AddArgs {
    #[arg(long)]
    name: String,
    #[arg(long)]
    image: PathBuf,
    /// Save without asking for confirmation.
    #[arg(long)]
    yes: bool,
}

#[derive(Debug, Parser)]
struct SnapshotArgs {
    #[arg(long)]
    plant: String,
    #[arg(long)]
    image: PathBuf,
}

#[derive(Debug, Parser)]
struct ShowArgs {
    #[arg(long)]
    plant: String,
    #[arg(long)]
    snapshot: Option<String>,
    /// Print the plant record as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct RenameArgs {
    #[arg(long)]
    plant: String,
    #[arg(long)]
    name: String,
}

#[derive(Debug, Parser)]
struct FeedbackArgs {
    #[arg(long)]
    plant: String,
    #[arg(long)]
    snapshot: String,
    #[arg(long, value_enum)]
    rating: RatingArg,
    #[arg(long)]
    comment: Option<String>,
}

#[derive(Debug, Parser)]
struct DeleteSnapshotArgs {
    #[arg(long)]
    plant: String,
    #[arg(long)]
    snapshot: String,
}

#[derive(Debug, Parser)]
struct GrowthArgs {
    #[arg(long)]
    plant: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RatingArg {
    Correct,
    Incorrect,
}

impl From<RatingArg> for Rating {
    fn from(value: RatingArg) -> Self {
        match value {
            RatingArg::Correct => Rating::Correct,
            RatingArg::Incorrect => Rating::Incorrect,
        }
    }
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("leaflog error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    let data = DataDir::resolve(cli.data_dir);
    let mut out = io::stdout().lock();
    match cli.command {
        Command::Add(args) => run_add(&data, args, &mut out),
        Command::Snapshot(args) => run_snapshot(&data, args, &mut out),
        Command::List => run_list(&data, &mut out),
        Command::Show(args) => run_show(&data, args, &mut out),
        Command::Rename(args) => run_rename(&data, args, &mut out),
        Command::Feedback(args) => run_feedback(&data, args, &mut out),
        Command::DeleteSnapshot(args) => run_delete_snapshot(&data, args, &mut out),
        Command::Growth(args) => run_growth(&data, args, &mut out),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

/// Layout of the on-disk journal.
struct DataDir {
    root: PathBuf,
    session_id: String,
}

impl DataDir {
    fn resolve(flag: Option<PathBuf>) -> Self {
        let root = flag
            .or_else(|| {
                env::var("LEAFLOG_DATA_DIR")
                    .ok()
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        Self::at(root)
    }

    fn at(root: PathBuf) -> Self {
        Self {
            root,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    fn store_path(&self) -> PathBuf {
        self.root.join("store.json")
    }

    fn events(&self) -> EventLog {
        EventLog::new(self.root.join("events.jsonl"), self.session_id.clone())
    }

    fn open_store(&self) -> PlantStore<JsonFileStore> {
        PlantStore::open(JsonFileStore::new(self.store_path())).with_events(self.events())
    }
}

fn run_add(data: &DataDir, args: AddArgs, out: &mut impl Write) -> Result<i32> {
    let name = validate_name(&args.name)?;
    let (image, reconciled) = analyze_photo(data, &args.image)?;
    write_analysis(out, &reconciled.analysis, &reconciled.summary)?;

    if !args.yes {
        let stdin = io::stdin();
        let prompt = format!("Add \"{name}\" to your plants?");
        if !confirm(&mut stdin.lock(), out, &prompt)? {
            writeln!(out, "Discarded.")?;
            return Ok(0);
        }
    }

    let image_url = archive_image(&data.root, &image)?;
    let first = Snapshot::new(image_url, reconciled.analysis, reconciled.summary);
    let plant = Plant::new(name, first);
    let plant_id = plant.id.clone();
    let mut store = data.open_store();
    store.create(plant)?;
    writeln!(out, "Added plant {plant_id}.")?;
    Ok(0)
}

fn run_snapshot(data: &DataDir, args: SnapshotArgs, out: &mut impl Write) -> Result<i32> {
    let mut store = data.open_store();
    if store.find_by_id(&args.plant).is_none() {
        bail!("no plant with id {}", args.plant);
    }
    let (image, reconciled) = analyze_photo(data, &args.image)?;
    let image_url = archive_image(&data.root, &image)?;
    let snapshot = Snapshot::new(image_url, reconciled.analysis, reconciled.summary);
    let snapshot_id = snapshot.id.clone();
    write_analysis(out, &snapshot.analysis, &snapshot.summary)?;
    store.append(&args.plant, snapshot)?;
    writeln!(out, "Recorded snapshot {snapshot_id}.")?;
    Ok(0)
}

fn run_list(data: &DataDir, out: &mut impl Write) -> Result<i32> {
    let store = data.open_store();
    if store.plants().is_empty() {
        writeln!(out, "No plants yet. Add one with `leaflog add`.")?;
        return Ok(0);
    }
    for plant in store.plants() {
        writeln!(out, "{}", plant_line(plant))?;
    }
    Ok(0)
}

fn run_show(data: &DataDir, args: ShowArgs, out: &mut impl Write) -> Result<i32> {
    let store = data.open_store();
    let plant = require_plant(&store, &args.plant)?;
    if args.json {
        writeln!(out, "{}", serde_json::to_string_pretty(plant)?)?;
        return Ok(0);
    }

    let selected = match &args.snapshot {
        Some(snapshot_id) => plant
            .find_snapshot(snapshot_id)
            .with_context(|| format!("no snapshot {snapshot_id} on plant {}", plant.id))?,
        None => plant
            .latest_snapshot()
            .with_context(|| format!("plant {} has no snapshots", plant.id))?,
    };

    writeln!(out, "{} ({})", plant.name, plant.id)?;
    writeln!(out, "History:")?;
    for snapshot in plant.snapshots.iter().rev() {
        let marker = if snapshot.id == selected.id { "*" } else { " " };
        writeln!(
            out,
            " {marker} {}  {}",
            snapshot.timestamp,
            snapshot.analysis.health
        )?;
    }
    writeln!(out)?;
    writeln!(out, "Snapshot {}", selected.id)?;
    writeln!(out, "Image: {}", selected.image_url)?;
    write_analysis(out, &selected.analysis, &selected.summary)?;
    Ok(0)
}

fn run_rename(data: &DataDir, args: RenameArgs, out: &mut impl Write) -> Result<i32> {
    let name = validate_name(&args.name)?;
    let mut store = data.open_store();
    require_plant(&store, &args.plant)?;
    store.rename(&args.plant, name)?;
    writeln!(out, "Renamed plant {} to \"{name}\".", args.plant)?;
    Ok(0)
}

fn run_feedback(data: &DataDir, args: FeedbackArgs, out: &mut impl Write) -> Result<i32> {
    let mut store = data.open_store();
    let plant = require_plant(&store, &args.plant)?;
    if plant.find_snapshot(&args.snapshot).is_none() {
        bail!("no snapshot {} on plant {}", args.snapshot, args.plant);
    }
    let feedback = Feedback {
        rating: args.rating.into(),
        comment: args
            .comment
            .map(|comment| comment.trim().to_string())
            .filter(|comment| !comment.is_empty()),
    };
    store.set_feedback(&args.plant, &args.snapshot, feedback)?;
    writeln!(out, "Thanks for the feedback.")?;
    Ok(0)
}

fn run_delete_snapshot(
    data: &DataDir,
    args: DeleteSnapshotArgs,
    out: &mut impl Write,
) -> Result<i32> {
    let mut store = data.open_store();
    let plant = require_plant(&store, &args.plant)?;
    if plant.find_snapshot(&args.snapshot).is_none() {
        bail!("no snapshot {} on plant {}", args.snapshot, args.plant);
    }
    store.delete_snapshot(&args.plant, &args.snapshot)?;
    if store.find_by_id(&args.plant).is_none() {
        writeln!(
            out,
            "Deleted the last snapshot; plant {} was removed.",
            args.plant
        )?;
    } else {
        writeln!(out, "Deleted snapshot {}.", args.snapshot)?;
    }
    Ok(0)
}

fn run_growth(data: &DataDir, args: GrowthArgs, out: &mut impl Write) -> Result<i32> {
    let store = data.open_store();
    let plant = require_plant(&store, &args.plant)?;
    let series = growth_series(plant);
    if !series.is_chartable() {
        writeln!(
            out,
            "Add at least two snapshots of {} to see growth over time.",
            plant.name
        )?;
        return Ok(0);
    }
    writeln!(out, "{:<12} {:>10} {:>10}", "date", "height", "width")?;
    for point in &series.points {
        writeln!(
            out,
            "{:<12} {:>10.1} {:>10.1}",
            point.timestamp.format("%Y-%m-%d"),
            point.height,
            point.width
        )?;
    }
    Ok(0)
}

fn analyze_photo(data: &DataDir, path: &Path) -> Result<(ImagePayload, ReconciledAnalysis)> {
    let image = read_image(path).with_context(|| {
        format!(
            "Could not read a plant photo from {}. Please try again with a PNG, JPEG, WebP or GIF image.",
            path.display()
        )
    })?;
    let engine =
        AnalysisEngine::from_config(&AnalyzerConfig::from_env()).with_events(data.events());
    let reconciled = engine.analyze(&image).context(ANALYSIS_FAILED_MESSAGE)?;
    Ok((image, reconciled))
}

/// Copies the image under `images/`, named by the first 8 bytes of its SHA-256.
/// Returns the path relative to the data directory.
fn archive_image(root: &Path, image: &ImagePayload) -> Result<String> {
    let bytes = image.decode()?;
    let digest = Sha256::digest(&bytes);
    let file_name = format!("{}.{}", hex::encode(&digest[..8]), image.extension());
    let images_dir = root.join("images");
    fs::create_dir_all(&images_dir)
        .with_context(|| format!("failed to create {}", images_dir.display()))?;
    let target = images_dir.join(&file_name);
    if !target.exists() {
        fs::write(&target, &bytes)
            .with_context(|| format!("failed to write {}", target.display()))?;
    }
    Ok(format!("images/{file_name}"))
}

fn require_plant<'a>(store: &'a PlantStore<JsonFileStore>, plant_id: &str) -> Result<&'a Plant> {
    store
        .find_by_id(plant_id)
        .with_context(|| format!("no plant with id {plant_id}"))
}

fn validate_name(raw: &str) -> Result<&str> {
    let name = raw.trim();
    if name.is_empty() {
        bail!("plant name cannot be blank");
    }
    Ok(name)
}

fn confirm(input: &mut impl BufRead, out: &mut impl Write, prompt: &str) -> Result<bool> {
    write!(out, "{prompt} [y/N] ")?;
    out.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn plant_line(plant: &Plant) -> String {
    let latest = plant.latest_snapshot().map(|snapshot| &snapshot.analysis);
    let health = latest
        .map(|analysis| analysis.health.as_str())
        .unwrap_or("Unknown");
    let species = latest
        .and_then(|analysis| analysis.common_name.as_deref().or(analysis.species.as_deref()))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or("Analysis pending");
    let count = plant.snapshots.len();
    let noun = if count == 1 { "snapshot" } else { "snapshots" };
    format!(
        "{}  {}  [{health}]  {species}  ({count} {noun})",
        plant.id, plant.name
    )
}

fn write_analysis(out: &mut impl Write, analysis: &AnalysisResult, summary: &str) -> Result<()> {
    if !analysis.is_plant {
        writeln!(out, "This photo does not look like a plant.")?;
    }
    if !summary.trim().is_empty() {
        writeln!(out, "{}", summary.trim())?;
    }
    writeln!(out, "Health: {}", analysis.health)?;
    writeln!(out, "Confidence: {:.0}%", analysis.confidence * 100.0)?;
    if let Some(species) = &analysis.species {
        writeln!(out, "Species: {species}")?;
    }
    if let Some(common_name) = &analysis.common_name {
        writeln!(out, "Common name: {common_name}")?;
    }
    if let Some(height) = &analysis.height {
        writeln!(out, "Height: {height}")?;
    }
    if let Some(width) = &analysis.width {
        writeln!(out, "Width: {width}")?;
    }
    if let Some(disease) = &analysis.disease {
        writeln!(out, "Disease: {} (severity: {})", disease.name, disease.severity)?;
        for recommendation in &disease.recommendations {
            writeln!(out, "  - {recommendation}")?;
        }
    }
    if !analysis.advice.is_empty() {
        writeln!(out, "Action plan:")?;
        for (index, advice) in analysis.advice.iter().enumerate() {
            writeln!(out, "  {}. {}: {}", index + 1, advice.title, advice.description)?;
        }
    }
    if let Some(feedback) = &analysis.feedback {
        match &feedback.comment {
            Some(comment) => writeln!(out, "Feedback: {} ({comment})", feedback.rating.as_str())?,
            None => writeln!(out, "Feedback: {}", feedback.rating.as_str())?,
        }
    }
    Ok(())
}
