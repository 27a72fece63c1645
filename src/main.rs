use std::fs;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use sink_core::{AddArgs, Command, DedupeArgs, QuarantineArgs};
use sink_quarantine::DefaultOrdering;
use sink_resolver::ResolveReport;
use sink_store::{IndexStore, Status};

/// On-disk shape of the candidates file: one inner list of absolute path
/// strings per candidate group, nothing else.
type CandidateGroups = Vec<Vec<String>>;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = sink_core::parse_args();
    match cli.command {
        Command::Add(args) => run_add(args),
        Command::Dedupe(args) => run_dedupe(args),
        Command::Quarantine(args) => run_quarantine(args),
    }
}

// ============================================================================
// add
// ============================================================================

fn run_add(args: AddArgs) -> Result<()> {
    let start = Instant::now();

    let store = IndexStore::open(&args.db_path)
        .with_context(|| format!("opening index database at {}", args.db_path.display()))?;
    let report_id = store.new_report(args.description.as_deref())?;

    log::info!("walking {}", args.path.display());
    let marked = sink_traversal::mark(&store, &args.path, &args.ignore_path_names)?;
    log::info!(
        "walk found {} paths to index ({} skipped)",
        marked.marked.len(),
        marked.skipped.len()
    );

    sink_index::process_marked(&store, report_id, args.chunksize, &marked.marked, args.threads)?;

    let elapsed = start.elapsed();
    println!(
        "indexed {} paths under {} in {:.2}s ({} skipped, report #{report_id})",
        marked.marked.len(),
        args.path.display(),
        elapsed.as_secs_f64(),
        marked.skipped.len(),
    );
    if !marked.skipped.is_empty() {
        eprintln!("skipped (permission denied):");
        for path in &marked.skipped {
            eprintln!("  {}", path.display());
        }
    }

    Ok(())
}

// ============================================================================
// dedupe
// ============================================================================

fn run_dedupe(args: DedupeArgs) -> Result<()> {
    let store = IndexStore::open(&args.db_path)
        .with_context(|| format!("opening index database at {}", args.db_path.display()))?;

    if !store.exists(&args.path.to_string_lossy(), Status::Completed)? {
        return Err(sink_core::SinkError::NotFound(args.path.clone()).into());
    }

    let report = sink_resolver::resolve(&store, &args.path)?;
    write_candidates(&args.candidate_path, &report)?;

    println!("found {} duplicate group(s) under {}", report.groups.len(), args.path.display());
    if args.use_bytes {
        println!(
            "{} bytes duplicated, {} bytes recoverable",
            report.original_size,
            report.original_size.saturating_sub(report.new_size)
        );
    } else {
        let total_members: usize = report.groups.iter().map(|g| g.records.len()).sum();
        println!("{total_members} duplicate paths across {} groups", report.groups.len());
    }
    println!("candidates written to {}", args.candidate_path.display());

    Ok(())
}

fn write_candidates(path: &Path, report: &ResolveReport) -> Result<()> {
    let groups: CandidateGroups =
        report.groups.iter().map(|c| c.records.iter().map(|r| r.path.clone()).collect()).collect();
    let file = fs::File::create(path)
        .with_context(|| format!("creating candidate file at {}", path.display()))?;
    serde_json::to_writer_pretty(file, &groups)?;
    Ok(())
}

// ============================================================================
// quarantine
// ============================================================================

fn run_quarantine(args: QuarantineArgs) -> Result<()> {
    let groups = read_candidates(&args.candidate_path)?;

    let quarantine_root = args
        .quarantine_root
        .unwrap_or_else(|| Path::new(".").join("sink-quarantine"));
    let base_path = args.candidate_path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();

    // Building the plan first (rather than re-deriving a preview sort)
    // means the preview and the executed plan are guaranteed to agree on
    // keeper and ordering.
    let plan = sink_quarantine::plan(&groups, &DefaultOrdering, &base_path, Utc::now());

    println!("top {} duplicate group(s) by size:", args.show_top.min(plan.groups.len()));
    for group in plan.groups.iter().take(args.show_top) {
        let size = fs::metadata(&group[0]).map(|m| m.len()).unwrap_or(0);
        println!("  {} x {} bytes - keeper: {}", group.len(), size, group[0]);
    }

    if !args.auto_confirm && !confirm("proceed with quarantine?")? {
        return Err(sink_core::SinkError::UserAbort.into());
    }

    let manifest_path = quarantine_root.join("manifest.json");
    fs::create_dir_all(&quarantine_root)?;
    let manifest_file = fs::File::create(&manifest_path)
        .with_context(|| format!("writing manifest to {}", manifest_path.display()))?;
    serde_json::to_writer_pretty(manifest_file, &plan)?;

    sink_quarantine::apply(&plan, &quarantine_root)?;

    println!(
        "quarantined {} paths into {} (manifest: {})",
        plan.quarantine.len(),
        quarantine_root.display(),
        manifest_path.display(),
    );

    Ok(())
}

fn read_candidates(path: &Path) -> Result<CandidateGroups> {
    let file = fs::File::open(path)
        .with_context(|| format!("reading candidate file at {}", path.display()))?;
    let groups = serde_json::from_reader(file)?;
    Ok(groups)
}

fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(matches!(input.trim().to_lowercase().as_str(), "y" | "yes"))
}
