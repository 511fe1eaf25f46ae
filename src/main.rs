use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use miette::{Context, IntoDiagnostic, Result};
use serde::Serialize;

use mutscope_core::{ChangeSet, MutantRecord, MutscopeConfig, MutscopeError, OutputFormat};
use mutscope_coverage::runner::{rotate_coverage, Measurement, TestRunner};
use mutscope_coverage::select::{select_tests, ChangedTests, TestSelection};
use mutscope_coverage::snapshot::CoverageSnapshot;
use mutscope_difflens::extract::{
    changes_from_patch, extract_changes, resolve_commit, DiffTarget, GitChangeSource,
};
use mutscope_difflens::filter::SourceFilter;
use mutscope_impact::report::SelectionView;
use mutscope_impact::ChangeSummary;
use mutscope_registry::fingerprint::tests_fingerprint;
use mutscope_registry::relink::{MutantRelinker, RelinkOutcome};
use mutscope_registry::store::BASELINE_KEY;
use mutscope_registry::{MutantRegistry, SqliteRegistry};

#[derive(Parser)]
#[command(
    name = "mutscope",
    version,
    about = "Incremental test-impact analysis for mutation testing",
    long_about = "mutscope finds out which tests and which mutants a change can affect,\n\
                   so a mutation-testing run only repeats the work the change invalidated.\n\n\
                   It compares a baseline commit with HEAD (or the working tree), pairs the\n\
                   per-test coverage recorded before and after, and keeps the mutant registry\n\
                   attached to its code across edits and renames.\n\n\
                   Examples:\n  \
                     mutscope diff                    Line changes since the recorded baseline\n  \
                     mutscope tests --worktree        Tests affected by uncommitted edits\n  \
                     mutscope affected --apply        Reset affected verdicts and relink mutants\n  \
                     mutscope measure --rotate        Re-measure per-test coverage\n  \
                     mutscope tests-for src/calc.py 5 Tests executing one line"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .mutscope.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Repository root (default: current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable tables and summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose output (debug logging unless MUTSCOPE_LOG is set)
    #[arg(long, short, global = true)]
    verbose: bool,
}

/// Where the change set comes from.
#[derive(Args)]
struct ChangeArgs {
    /// Baseline revision (default: the recorded baseline, else HEAD)
    #[arg(long)]
    base: Option<String>,

    /// Compare the baseline with the working tree instead of HEAD
    #[arg(long)]
    worktree: bool,

    /// Read a unified diff from a file ("-" for stdin) instead of git
    #[arg(long, conflicts_with_all = ["base", "worktree"])]
    patch: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Show line-level changes between the baseline and the current code
    #[command(long_about = "Show line-level changes between the baseline and the current code.\n\n\
        Every changed source file gets the 1-based lines removed from the old version\n\
        and added to the new one. Renames are keyed 'old:new'. Files whose diff could\n\
        not be computed are listed separately; their coverage counts as stale.\n\n\
        Examples:\n  mutscope diff\n  mutscope diff --base main --worktree\n  git diff -U0 main | mutscope diff --patch -")]
    Diff {
        #[command(flatten)]
        changes: ChangeArgs,
    },
    /// List the tests whose coverage the change touches
    #[command(long_about = "List the tests whose coverage the change touches.\n\n\
        Compares the previous and current coverage stores against the change set.\n\
        Without previous coverage every test is selected.\n\n\
        Examples:\n  mutscope tests\n  mutscope tests --worktree --format json")]
    Tests {
        #[command(flatten)]
        changes: ChangeArgs,
    },
    /// Find mutants whose verdict the change may have invalidated
    #[command(long_about = "Find mutants whose verdict the change may have invalidated.\n\n\
        Reports tested mutants executed by a changed test and mutants on freshly\n\
        added lines that no test executes. With --apply, affected verdicts are reset,\n\
        mutants follow renames and line shifts, and the baseline moves to HEAD.\n\
        Against the working tree or a patch, --apply only resets verdicts.\n\n\
        Examples:\n  mutscope affected\n  mutscope affected --apply\n  mutscope affected --mutants current-mutants.json")]
    Affected {
        #[command(flatten)]
        changes: ChangeArgs,

        /// Write the results to the mutant registry
        #[arg(long)]
        apply: bool,

        /// JSON list of mutants enumerated on the current source
        #[arg(long)]
        mutants: Option<PathBuf>,
    },
    /// Move mutant records across renames and line shifts
    #[command(long_about = "Move mutant records across renames and line shifts.\n\n\
        Mutants of renamed files are cloned onto the new path with their cached\n\
        verdict; mutants of files edited in place get their line numbers rewritten.\n\
        The baseline then moves to HEAD, so running it twice changes nothing.\n\n\
        Examples:\n  mutscope relink\n  mutscope relink --base v1.2.0")]
    Relink {
        #[command(flatten)]
        changes: ChangeArgs,
    },
    /// Run the test command with per-test coverage
    #[command(long_about = "Run the test command with per-test coverage.\n\n\
        Runs the configured command under its wall-clock budget. Passing test ids\n\
        runs only those tests. With --rotate the current coverage store becomes\n\
        the previous one first.\n\n\
        Examples:\n  mutscope measure --rotate\n  mutscope measure tests/test_calc.py::test_add")]
    Measure {
        /// Test ids to run (default: the whole suite)
        tests: Vec<String>,

        /// Move the current coverage store to the previous location first
        #[arg(long)]
        rotate: bool,

        /// Override the wall-clock budget, in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// List the tests executing one line of the current coverage
    #[command(name = "tests-for")]
    TestsFor {
        /// Repository-relative source file
        file: String,

        /// 1-based line number
        line: u32,
    },
    /// Record the baseline commit in the mutant registry
    #[command(long_about = "Record the baseline commit in the mutant registry.\n\n\
        Later analyses compare against this commit unless --base is given.\n\n\
        Examples:\n  mutscope baseline\n  mutscope baseline HEAD~3")]
    Baseline {
        /// Revision to record (default: HEAD)
        #[arg(default_value = "HEAD")]
        rev: String,
    },
    /// Create a default .mutscope.toml configuration file
    #[command(long_about = "Create a default .mutscope.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .mutscope.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# mutscope configuration

[source]
# Source files that take part in diff extraction
# include = ["**/*.py"]
# exclude = ["tests/**"]

[coverage]
# Coverage stores (coverage.py SQLite or JSON), relative to the repository root
# previous = ".coverage_old"
# current = ".coverage"

[runner]
# Test command; per-test contexts are required
# command = "python -m pytest"
# args = ["--cov-context=test", "-q"]
# timeout_secs = 1800
# Paths hashed into the test fingerprint
# test_paths = ["tests"]

[registry]
# path = ".mutscope/registry.db"
"#;

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!("mutscope v{version} - rerun only what a change can affect\n");

    println!("Quick start:");
    println!("  mutscope init                 Create a .mutscope.toml config file");
    println!("  mutscope measure --rotate     Record per-test coverage");
    println!("  mutscope affected --apply     Update the mutant registry after a change\n");

    println!("All commands:");
    println!("  diff       Line-level changes since the baseline");
    println!("  tests      Tests whose coverage the change touches");
    println!("  affected   Mutants to retest");
    println!("  relink     Move mutants across renames and line shifts");
    println!("  measure    Run the tests with per-test coverage");
    println!("  tests-for  Tests executing one line");
    println!("  baseline   Record the baseline commit");
    println!("  init       Create default configuration\n");

    println!("Run 'mutscope <command> --help' for details.");
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env("MUTSCOPE_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Repository root plus its configuration.
struct Workspace {
    root: PathBuf,
    config: MutscopeConfig,
}

impl Workspace {
    fn registry(&self) -> Result<SqliteRegistry> {
        let path = self.root.join(&self.config.registry.path);
        Ok(SqliteRegistry::open(&path)?)
    }

    /// Baseline recorded by an earlier run, without creating the registry.
    fn recorded_baseline(&self) -> Result<Option<String>> {
        if !self.root.join(&self.config.registry.path).exists() {
            return Ok(None);
        }
        Ok(self.registry()?.metadata(BASELINE_KEY)?)
    }

    fn changes(&self, args: &ChangeArgs) -> Result<ChangeSet> {
        let filter = SourceFilter::from_config(&self.config.source);
        if let Some(patch) = &args.patch {
            let input = read_patch(patch)?;
            return Ok(changes_from_patch(&input, &filter));
        }

        let base = match &args.base {
            Some(base) => base.clone(),
            None => self
                .recorded_baseline()?
                .unwrap_or_else(|| "HEAD".to_string()),
        };
        let target = if args.worktree {
            DiffTarget::Workdir
        } else {
            DiffTarget::Head
        };
        tracing::debug!(%base, ?target, "extracting changes");
        let source = GitChangeSource::open(&self.root, &base, target)?;
        Ok(extract_changes(&source, &filter)?)
    }

    /// Commit the stored line numbers may move to after diffing with `args`.
    ///
    /// Only committed history from the recorded baseline qualifies: the
    /// working tree and patches give `None`.
    fn relink_target(&self, args: &ChangeArgs) -> Result<Option<String>> {
        if args.worktree || args.patch.is_some() {
            return Ok(None);
        }
        if let (Some(base), Some(recorded)) = (&args.base, self.recorded_baseline()?) {
            if resolve_commit(&self.root, base)? != recorded {
                return Err(miette::miette!(
                    help = "record it first with 'mutscope baseline <rev>'",
                    "registry line numbers follow baseline {recorded}, not {base}"
                ));
            }
        }
        Ok(Some(resolve_commit(&self.root, "HEAD")?))
    }

    fn previous_coverage(&self) -> Result<Option<CoverageSnapshot>> {
        let path = self.root.join(&self.config.coverage.previous);
        match CoverageSnapshot::load(&path, &self.root) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(MutscopeError::FileNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn current_coverage(&self) -> Result<CoverageSnapshot> {
        let path = self.root.join(&self.config.coverage.current);
        CoverageSnapshot::load(&path, &self.root)
            .map_err(|e| miette::miette!(help = "run 'mutscope measure' first", "{e}"))
    }

    fn fingerprint(&self) -> Result<String> {
        Ok(tests_fingerprint(&self.root, &self.config.runner.test_paths)?)
    }
}

fn read_patch(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .into_diagnostic()
            .wrap_err("reading stdin")?;
        return Ok(input);
    }
    std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))
}

fn read_mutants(path: &Path) -> Result<Vec<MutantRecord>> {
    let content = std::fs::read_to_string(path)
        .into_diagnostic()
        .wrap_err(format!("reading {}", path.display()))?;
    serde_json::from_str(&content)
        .into_diagnostic()
        .wrap_err(format!("parsing mutant list {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn print_relink(outcome: &RelinkOutcome, format: OutputFormat) -> Result<()> {
    let moved: usize = outcome.rewritten.iter().map(|(_, rw)| rw.moved).sum();
    let dropped: usize = outcome.demoted.len()
        + outcome
            .rewritten
            .iter()
            .map(|(_, rw)| rw.dropped)
            .sum::<usize>();
    match format {
        OutputFormat::Json => print_json(outcome)?,
        OutputFormat::Markdown => {
            println!("# Relink\n");
            println!("| Action | Count |");
            println!("|--------|-------|");
            println!("| Relinked across renames | {} |", outcome.relinked.len());
            println!("| Lines rewritten | {moved} |");
            println!("| Dropped with removed lines | {dropped} |");
        }
        OutputFormat::Text => {
            for (original, clone) in &outcome.relinked {
                println!("{original} -> {}:{}", clone.file, clone.coverage_line());
            }
            println!(
                "\nSummary: {} relinked, {} moved, {} dropped",
                outcome.relinked.len(),
                moved,
                dropped
            );
        }
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MeasureSummary {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    files: usize,
    lines: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

impl From<&Measurement> for MeasureSummary {
    fn from(measurement: &Measurement) -> Self {
        match measurement {
            Measurement::Fresh { snapshot, success } => Self {
                status: "fresh",
                success: Some(*success),
                files: snapshot.len(),
                lines: snapshot
                    .files()
                    .map(|f| snapshot.covered_lines(f).len())
                    .sum(),
                reason: None,
            },
            Measurement::Stale { reason } => Self {
                status: "stale",
                success: None,
                files: 0,
                lines: 0,
                reason: Some(reason.clone()),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .expect("miette handler");
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = MutscopeConfig::resolve(cli.config.as_deref(), &cli.path)?;
    let ws = Workspace {
        root: cli.path.clone(),
        config,
    };

    match cli.command {
        None => {
            print_welcome();
            return Ok(());
        }
        Some(Command::Diff { ref changes }) => {
            let changes = ws.changes(changes)?;
            let summary = ChangeSummary::from(&changes);

            match cli.format {
                OutputFormat::Json => print_json(&changes)?,
                OutputFormat::Markdown => print!("{}", summary.to_markdown()),
                OutputFormat::Text => print!("{summary}"),
            }
        }
        Some(Command::Tests { ref changes }) => {
            let changes = ws.changes(changes)?;
            let previous = ws.previous_coverage()?;
            let current = ws.current_coverage()?;
            let selection = select_tests(previous.as_ref(), &current, &changes);

            match cli.format {
                OutputFormat::Json => print_json(&selection)?,
                OutputFormat::Markdown => print!("{}", SelectionView(&selection).to_markdown()),
                OutputFormat::Text => print!("{}", SelectionView(&selection)),
            }
        }
        Some(Command::Affected {
            ref changes,
            apply,
            ref mutants,
        }) => {
            let change_set = ws.changes(changes)?;
            let mut registry = ws.registry()?;
            let previous = ws.previous_coverage()?;
            let current = ws.current_coverage()?;
            let fingerprint = ws.fingerprint()?;
            let current_mutants = match mutants {
                Some(path) => read_mutants(path)?,
                None => Vec::new(),
            };

            let report = mutscope_impact::analyze(
                &change_set,
                previous.as_ref(),
                &current,
                &registry,
                &current_mutants,
                &fingerprint,
            )?;

            let outcome = if apply {
                let next_baseline = ws.relink_target(changes)?;
                Some(mutscope_impact::apply(
                    &report,
                    &mut registry,
                    next_baseline.as_deref(),
                )?)
            } else {
                None
            };

            match cli.format {
                OutputFormat::Json => {
                    #[derive(Serialize)]
                    #[serde(rename_all = "camelCase")]
                    struct AffectedOutput<'a> {
                        report: &'a mutscope_impact::ImpactReport,
                        #[serde(skip_serializing_if = "Option::is_none")]
                        applied: Option<&'a mutscope_impact::ApplyOutcome>,
                    }
                    print_json(&AffectedOutput {
                        report: &report,
                        applied: outcome.as_ref(),
                    })?;
                }
                OutputFormat::Markdown => {
                    print!("{}", report.to_markdown());
                    if let Some(outcome) = &outcome {
                        print!("\n{}", outcome.to_markdown());
                    }
                }
                OutputFormat::Text => {
                    print!("{report}");
                    if let Some(outcome) = &outcome {
                        print!("\n{outcome}");
                    }
                }
            }
        }
        Some(Command::Relink { ref changes }) => {
            let Some(target) = ws.relink_target(changes)? else {
                miette::bail!(
                    help = "commit the change, then run 'mutscope relink'",
                    "relinking needs a committed target; --worktree and --patch cannot move the baseline"
                );
            };
            let change_set = ws.changes(changes)?;
            let mut registry = ws.registry()?;
            let fingerprint = ws.fingerprint()?;
            let outcome =
                MutantRelinker::new(&change_set, &fingerprint).apply(&mut registry, &target)?;
            print_relink(&outcome, cli.format)?;
        }
        Some(Command::Measure {
            ref tests,
            rotate,
            timeout,
        }) => {
            if rotate && rotate_coverage(&ws.config.coverage, &ws.root)? {
                eprintln!(
                    "Rotated {} to {}",
                    ws.config.coverage.current.display(),
                    ws.config.coverage.previous.display()
                );
            }

            let mut runner =
                TestRunner::from_config(&ws.config.runner, &ws.config.coverage, &ws.root)?;
            if let Some(secs) = timeout {
                runner = runner.with_timeout(Duration::from_secs(secs));
            }
            let selection = if tests.is_empty() {
                TestSelection::All
            } else {
                TestSelection::Only(tests.iter().map(String::as_str).collect::<ChangedTests>())
            };

            let measurement = runner.measure(&selection).await?;
            let summary = MeasureSummary::from(&measurement);
            match cli.format {
                OutputFormat::Json => print_json(&summary)?,
                OutputFormat::Markdown => {
                    println!("# Coverage Measurement\n");
                    match &summary.reason {
                        Some(reason) => println!("**Stale:** {reason}"),
                        None => println!(
                            "**Fresh:** {} files, {} covered lines",
                            summary.files, summary.lines
                        ),
                    }
                }
                OutputFormat::Text => match &summary.reason {
                    Some(reason) => println!("Coverage is stale: {reason}"),
                    None => println!(
                        "Measured {} files, {} covered lines{}",
                        summary.files,
                        summary.lines,
                        if summary.success == Some(false) {
                            " (test command failed)"
                        } else {
                            ""
                        }
                    ),
                },
            }
            if matches!(measurement, Measurement::Stale { .. }) {
                return Err(miette::miette!(
                    help = "raise runner.timeout_secs or pass --timeout",
                    "coverage measurement exceeded its time budget"
                ));
            }
        }
        Some(Command::TestsFor { ref file, line }) => {
            let current = ws.current_coverage()?;
            let ids = mutscope_coverage::context::tests_for_line(&current, file, line);
            match cli.format {
                OutputFormat::Json => print_json(&ids)?,
                OutputFormat::Markdown => {
                    println!("# Tests for {file}:{line}\n");
                    for id in &ids {
                        println!("- `{id}`");
                    }
                }
                OutputFormat::Text => {
                    for id in &ids {
                        println!("{id}");
                    }
                }
            }
        }
        Some(Command::Baseline { ref rev }) => {
            let commit = resolve_commit(&ws.root, rev)?;
            let mut registry = ws.registry()?;
            registry.set_metadata(BASELINE_KEY, &commit)?;
            match cli.format {
                OutputFormat::Json => print_json(&serde_json::json!({ "baseline": commit }))?,
                _ => println!("Baseline set to {commit}"),
            }
        }
        Some(Command::Init) => {
            let path = ws.root.join(".mutscope.toml");
            if path.exists() {
                miette::bail!(".mutscope.toml already exists");
            }
            std::fs::write(&path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created .mutscope.toml with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "mutscope", &mut std::io::stdout());
        }
    }

    Ok(())
}
