use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::{Datelike, Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dengue_tracker::app::{App, DownloadResult, MapResult, PrepareResult, YearsResult};
use dengue_tracker::archives::ArchiveHttpClient;
use dengue_tracker::config::{ConfigLoader, ResolvedConfig};
use dengue_tracker::error::TrackerError;
use dengue_tracker::fetcher::{AlertCityHttpClient, RetryingFetcher};
use dengue_tracker::orchestrator::CancelToken;
use dengue_tracker::output::{JsonOutput, OutputMode, WeekEntry, WeekListing};
use dengue_tracker::store::Store;
use dengue_tracker::tui::{Operation, Tui};
use dengue_tracker::weeks::{FIRST_YEAR, FetchPlan, selectable_years, weeks_of_year};

#[derive(Parser)]
#[command(name = "dengue-tracker")]
#[command(about = "Download InfoDengue alerts per city and week, and build map datasets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "List the epidemiological weeks of a year")]
    Weeks(WeeksArgs),
    #[command(about = "Download weekly alerts for every city and merge them into the dataset")]
    Download(DownloadArgs),
    #[command(about = "List years present in the case dataset")]
    Years,
    #[command(about = "Join one week of cases with city names and geometries")]
    Map(MapArgs),
    #[command(about = "Fetch and unpack the IBGE reference archives")]
    Prepare,
}

#[derive(Args)]
struct WeeksArgs {
    year: i32,
}

#[derive(Args)]
struct DownloadArgs {
    /// Week start date (a Sunday), repeatable.
    #[arg(long = "date", value_name = "YYYY-MM-DD")]
    dates: Vec<String>,

    #[arg(long)]
    year: Option<i32>,

    /// Week number within --year, repeatable.
    #[arg(long = "week", requires = "year")]
    weeks: Vec<u32>,
}

#[derive(Args)]
struct MapArgs {
    #[arg(long)]
    year: i32,

    #[arg(long, value_name = "YYYY-MM-DD")]
    week: Option<String>,

    /// Write the joined rows as a GeoJSON FeatureCollection.
    #[arg(long)]
    export: Option<Utf8PathBuf>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<TrackerError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &TrackerError) -> u8 {
    match error {
        TrackerError::InvalidGeocode(_)
        | TrackerError::InvalidYear(_)
        | TrackerError::InvalidWeek(_)
        | TrackerError::InvalidDate(_)
        | TrackerError::ConfigRead(_)
        | TrackerError::ConfigParse(_)
        | TrackerError::InvalidConfig(_)
        | TrackerError::MissingReferenceData(_)
        | TrackerError::NoCaseData(_) => 2,
        TrackerError::TransientFetch(_)
        | TrackerError::PermanentFetch(_)
        | TrackerError::RetriesExhausted { .. }
        | TrackerError::ArchiveHttp(_)
        | TrackerError::ArchiveStatus { .. } => 3,
        TrackerError::Persistence(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Weeks(args) => run_weeks(args, today, output_mode),
        Commands::Download(args) => run_download(args, &config, today, output_mode),
        Commands::Years => run_years(&config, output_mode),
        Commands::Map(args) => run_map(args, &config, output_mode),
        Commands::Prepare => run_prepare(&config, output_mode),
    }
}

fn build_app(config: &ResolvedConfig) -> Result<App<AlertCityHttpClient>, TrackerError> {
    let store = Store::new(&config.data_dir)?;
    let client = AlertCityHttpClient::new(config.api.timeout)?;
    let fetcher = RetryingFetcher::new(client, config.retry);
    Ok(App::new(store, config.api.clone(), fetcher))
}

fn run_weeks(args: WeeksArgs, today: NaiveDate, output_mode: OutputMode) -> miette::Result<()> {
    if !selectable_years(today).contains(&args.year) {
        return Err(TrackerError::InvalidYear(format!(
            "{} (supported: {FIRST_YEAR}..={})",
            args.year,
            today.year()
        ))
        .into());
    }
    let listing = WeekListing {
        year: args.year,
        weeks: weeks_of_year(args.year, today)
            .into_iter()
            .enumerate()
            .map(|(index, start)| WeekEntry {
                week: index as u32 + 1,
                start,
            })
            .collect(),
    };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_weeks(&listing).into_diagnostic(),
        OutputMode::Interactive => {
            if listing.weeks.is_empty() {
                println!("{}: no weeks started yet", listing.year);
            }
            for entry in &listing.weeks {
                println!("{:>2}  {}", entry.week, entry.start);
            }
            Ok(())
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, TrackerError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map_err(|err| TrackerError::InvalidDate(format!("{value}: {err}")))
}

fn build_plan(args: &DownloadArgs, today: NaiveDate) -> Result<FetchPlan, TrackerError> {
    let dates = args
        .dates
        .iter()
        .map(|value| parse_date(value))
        .collect::<Result<Vec<_>, _>>()?;
    let mut plan = FetchPlan::from_week_dates(&dates, today)?;
    if let Some(year) = args.year {
        if args.weeks.is_empty() {
            return Err(TrackerError::InvalidWeek(format!(
                "--year {year} needs at least one --week"
            )));
        }
        for week in &args.weeks {
            plan.insert(year, *week, today)?;
        }
    }
    Ok(plan)
}

fn run_download(
    args: DownloadArgs,
    config: &ResolvedConfig,
    today: NaiveDate,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let plan = build_plan(&args, today)?;
    let app = build_app(config)?;
    let cancel = CancelToken::new();

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.download(&plan, &JsonOutput, &cancel)?;
            JsonOutput::print_download(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(Operation::Download);
            let worker_cancel = cancel.clone();
            let result = tui.run(cancel, move |sink| app.download(&plan, sink, &worker_cancel))?;
            print_download_summary(&result);
            Ok(())
        }
    }
}

fn run_years(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let result = build_app(config)?.years()?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_years(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_years(&result);
            Ok(())
        }
    }
}

fn run_map(args: MapArgs, config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let week = args.week.as_deref().map(parse_date).transpose()?;
    let result = build_app(config)?.map(args.year, week, args.export.as_deref())?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_map(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_map_summary(&result);
            Ok(())
        }
    }
}

fn run_prepare(config: &ResolvedConfig, output_mode: OutputMode) -> miette::Result<()> {
    let app = build_app(config)?;
    let client = ArchiveHttpClient::new()?;
    let sources = config.archives.clone();

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.prepare(&client, &sources, &JsonOutput)?;
            JsonOutput::print_prepare(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(Operation::Prepare);
            let result = tui.run(CancelToken::new(), move |sink| {
                app.prepare(&client, &sources, sink)
            })?;
            print_prepare_summary(&result);
            Ok(())
        }
    }
}

const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

fn print_download_summary(result: &DownloadResult) {
    let summary = &result.summary;
    let merge = &result.merge;

    println!("{CYAN}dengue-tracker download{RESET}");
    println!(
        "{GREEN}cells: {}/{} processed, {} with data, {} empty{RESET}",
        summary.processed, summary.total_cells, summary.fetched_cells, summary.empty_cells
    );
    if summary.cancelled {
        println!("{YELLOW}cancelled before all cells were fetched{RESET}");
    }
    let skipped_color = if summary.skipped.is_empty() { GREEN } else { RED };
    println!("{skipped_color}skipped: {}{RESET}", summary.skipped_count());
    for cell in &summary.skipped {
        println!(
            "{RED}  {} {}/{}: {}{RESET}",
            cell.geocode, cell.year, cell.week, cell.reason
        );
    }
    println!(
        "{GREEN}dataset: {} rows ({} added, {} replaced, {} unchanged){RESET}",
        merge.total_rows, merge.added, merge.replaced, merge.unchanged
    );
}

fn print_years(result: &YearsResult) {
    if result.years.is_empty() {
        println!("{YELLOW}case dataset is empty{RESET}");
        return;
    }
    for year in &result.years {
        println!("{year}");
    }
}

fn print_map_summary(result: &MapResult) {
    println!(
        "{CYAN}{} week of {}: {} total cases{RESET}",
        result.year, result.week, result.total_cases_label
    );
    for row in &result.rows {
        println!(
            "  {:<32} {:>7}  level {}",
            row.city_name, row.casos, row.nivel
        );
    }
    if !result.missing_geometry.is_empty() {
        println!(
            "{YELLOW}{} cities without geometry{RESET}",
            result.missing_geometry.len()
        );
    }
    if let Some(path) = &result.export_path {
        println!("{GREEN}exported: {path}{RESET}");
    }
}

fn print_prepare_summary(result: &PrepareResult) {
    println!("{CYAN}dengue-tracker prepare{RESET}");
    for archive in &result.archives {
        let color = if archive.action == "present" { YELLOW } else { GREEN };
        println!(
            "{color}{} ({}): {}{RESET}",
            archive.name, archive.action, archive.path
        );
    }
}
