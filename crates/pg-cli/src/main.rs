//! PrivacyGate CLI
//!
//! CLI tool for compiling filter lists, classifying requests against them and
//! resolving domain settings.

mod bench;
mod lists;

use clap::{Parser, Subcommand};
use log::warn;
use tracing_subscriber::EnvFilter;

use pg_core::{
    Disposition, DispositionPipeline, GlobalSettings, ResolvedSettings, ResourceRequest,
    ResourceRequestRecord, TabSession,
};

use crate::lists::RegistryInputs;

#[derive(Parser)]
#[command(name = "pg-cli")]
#[command(about = "PrivacyGate filter list compiler and tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile filter lists and report their health
    Compile {
        /// Input filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// List every skipped line
        #[arg(short, long)]
        verbose: bool,
    },

    /// Classify requests made by a page
    Check {
        /// Directory holding the filter list files
        #[arg(short, long)]
        lists: String,

        /// URL of the page making the requests
        #[arg(short, long)]
        page: String,

        /// Domain settings table (JSON array)
        #[arg(short, long)]
        settings: Option<String>,

        /// Global settings (JSON object)
        #[arg(short, long)]
        globals: Option<String>,

        /// Public suffix list file
        #[arg(long)]
        psl: Option<String>,

        /// Request as <type>=<url>, may be repeated
        #[arg(short, long)]
        request: Vec<String>,

        /// File with one <type>=<url> request per line
        #[arg(long)]
        requests: Option<String>,

        /// Print the ledger as JSON
        #[arg(long)]
        json: bool,
    },

    /// Resolve the settings that apply to a host
    Resolve {
        /// Domain settings table (JSON array)
        #[arg(short, long)]
        settings: String,

        /// Global settings (JSON object)
        #[arg(short, long)]
        globals: Option<String>,

        /// Host or URL to resolve
        #[arg(long)]
        host: String,
    },

    /// Measure classification latency
    Bench {
        /// Directory holding the filter list files
        #[arg(short, long)]
        lists: String,

        /// Number of passes over the request mix
        #[arg(short = 'n', long, default_value_t = 1000)]
        iterations: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile { input, verbose } => cmd_compile(&input, verbose),
        Commands::Check {
            lists,
            page,
            settings,
            globals,
            psl,
            request,
            requests,
            json,
        } => {
            let inputs = RegistryInputs {
                lists_dir: &lists,
                settings: settings.as_deref(),
                globals: globals.as_deref(),
                psl: psl.as_deref(),
            };
            cmd_check(inputs, &page, &request, requests.as_deref(), json).await
        }
        Commands::Resolve {
            settings,
            globals,
            host,
        } => cmd_resolve(&settings, globals.as_deref(), &host),
        Commands::Bench { lists, iterations } => cmd_bench(&lists, iterations).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_compile(inputs: &[String], verbose: bool) -> Result<(), String> {
    if inputs.is_empty() {
        return Err("No input files specified".to_string());
    }

    for path in inputs {
        let compiled = lists::compile_file(path)?;
        let health = compiled.list.health();

        println!("{} ({path})", compiled.name);
        println!("  Lines:              {}", health.lines);
        println!("  Block rules:        {}", health.block_rules);
        println!("  Allow rules:        {}", health.allow_rules);
        println!("  Inert rules:        {}", health.inert_rules);
        println!("  Skipped lines:      {}", health.skipped_lines);
        println!("  Duplicates removed: {}", health.duplicates_removed);
        println!("  Badfiltered:        {}", health.badfiltered);
        println!("  Host index keys:    {}", compiled.list.block_index().host_keys());
        println!("  Token index keys:   {}", compiled.list.block_index().token_keys());
        println!("  Generic rules:      {}", compiled.list.block_index().generic_rules());
        println!("  Compile time:       {:.2}ms", compiled.total_ms);

        if verbose {
            for (line, reason) in &compiled.skipped {
                println!("    skipped line {line}: {reason}");
            }
        }
    }

    Ok(())
}

async fn cmd_check(
    inputs: RegistryInputs<'_>,
    page: &str,
    request_specs: &[String],
    requests_file: Option<&str>,
    json: bool,
) -> Result<(), String> {
    let mut requests = request_specs
        .iter()
        .map(|spec| lists::parse_request_spec(spec))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(path) = requests_file {
        requests.extend(lists::read_requests_file(path)?);
    }
    if requests.is_empty() {
        return Err("No requests specified".to_string());
    }

    let (registry, summary) = lists::load_registry(inputs).await?;

    let mut session = TabSession::new();
    session.begin_navigation(page, &registry);

    let pipeline = DispositionPipeline::new(&registry);
    for (request_type, url) in &requests {
        pipeline.classify(&session, &ResourceRequest::new(url, *request_type));
    }

    let records = session.ledger().snapshot();
    let counters = session.ledger().counters();

    if json {
        let report = serde_json::json!({
            "page": page,
            "registrable_domain": session.current_registrable_domain(),
            "domain_settings_applied": session.domain_settings_applied(),
            "settings": session.settings(),
            "records": records,
            "counters": counters,
            "health": registry.health(),
        });
        let text = serde_json::to_string_pretty(&report).map_err(|e| format!("Failed to encode report: {}", e))?;
        println!("{text}");
        return Ok(());
    }

    println!("Page:             {page}");
    println!("Domain:           {}", session.current_registrable_domain());
    match session.settings().host_pattern.as_deref() {
        Some(pattern) => println!("Domain settings:  {pattern}"),
        None => println!("Domain settings:  (globals)"),
    }
    let loaded: Vec<String> = summary.loaded.iter().map(|k| k.to_string()).collect();
    println!("Lists loaded:     {}", loaded.join(", "));
    println!();

    for record in &records {
        println!("{}", format_record(record));
    }

    println!();
    println!("Total:            {}", counters.total);
    println!("Blocked:          {}", counters.blocked);
    println!("Third-party blocked: {}", counters.third_party_blocked);
    println!("Allowed:          {}", counters.allowed);
    println!("Default:          {}", counters.default);
    if counters.faults > 0 {
        println!("Faults:           {}", counters.faults);
    }

    Ok(())
}

fn format_record(record: &ResourceRequestRecord) -> String {
    let label = match record.disposition {
        Disposition::Default => "DEFAULT",
        Disposition::Allowed => "ALLOWED",
        Disposition::Blocked => "BLOCKED",
        Disposition::ThirdPartyBlocked => "3P-BLOCKED",
    };
    let mut line = format!("{label:<11} {:<15} {}", record.request_type.type_name(), record.url);
    if let Some(p) = &record.provenance {
        line.push_str(&format!(
            "\n            {} line {}: {}",
            p.list_name, p.line, p.matched_rule_text
        ));
    }
    line
}

fn cmd_resolve(settings_path: &str, globals_path: Option<&str>, host: &str) -> Result<(), String> {
    let table = lists::read_settings(settings_path)?;
    let globals = match globals_path {
        Some(path) => lists::read_globals(path)?,
        None => GlobalSettings::default(),
    };

    for pattern in table.quarantined() {
        warn!("Ignored invalid host pattern '{pattern}'");
    }

    let host = pg_core::url::extract_host(host);
    let lookup = table.lookup(&host).map_err(|e| e.to_string())?;
    let resolved = ResolvedSettings::resolve(lookup, &globals);

    let text = serde_json::to_string_pretty(&resolved).map_err(|e| format!("Failed to encode settings: {}", e))?;
    println!("{text}");
    Ok(())
}

async fn cmd_bench(lists_dir: &str, iterations: usize) -> Result<(), String> {
    let (registry, summary) = lists::load_registry(RegistryInputs {
        lists_dir,
        settings: None,
        globals: None,
        psl: None,
    })
    .await?;

    println!("Loaded {} lists ({} active rules) in {:?}", summary.loaded.len(), summary.active_rules, summary.elapsed);

    let result = bench::run(&registry, iterations);
    println!("{}", bench::format_result(&result));
    Ok(())
}
