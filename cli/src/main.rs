mod formatter;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use formatter::Formatter;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use xrule::{Engine, MemoryDocument, RuleSet, RunOptions};

#[derive(Parser)]
#[command(name = "xrule")]
#[command(about = "Alignment-aware rules over XBRL-style facts.")]
#[command(
    long_about = "xrule evaluates assertion and output rules against an instance document.\nRules and instances are read as JSON; each rule runs once per combination of aligned facts."
)]
#[command(version)]
struct Cli {
    /// Log rule progress to stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rules against an instance and print their messages
    ///
    /// Prints one line per message. A rule that fails is reported on stderr
    /// and the remaining rules still run, unless --crash-on-error is given.
    Run {
        /// Rule set (JSON)
        #[arg(long, value_name = "FILE")]
        rules: PathBuf,
        /// Instance document (JSON)
        #[arg(long, value_name = "FILE")]
        instance: PathBuf,
        /// Only run the named rule (repeatable)
        #[arg(long = "rule", value_name = "NAME")]
        rule: Vec<String>,
        /// Print the full run report as JSON
        #[arg(long)]
        json: bool,
        /// Stop at the first failing rule and exit with status 1
        #[arg(long)]
        crash_on_error: bool,
        /// Evaluate without the expression caches
        #[arg(long)]
        no_cache: bool,
        /// Run options (JSON); flags given on the command line take precedence
        #[arg(long, value_name = "FILE")]
        options: Option<PathBuf>,
    },
    /// List rules, constants and functions of a rule set
    ///
    /// Shows each declaration with the number of iterable expressions it
    /// contains, which is what drives the number of rule iterations.
    List {
        /// Rule set (JSON)
        #[arg(long, value_name = "FILE")]
        rules: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match &cli.command {
        Commands::Run {
            rules,
            instance,
            rule,
            json,
            crash_on_error,
            no_cache,
            options,
        } => load_options(options.as_deref()).and_then(|mut options| {
            options.crash_on_error |= *crash_on_error;
            options.no_cache |= *no_cache;
            if !rule.is_empty() {
                options.rule_filter = rule.clone();
            }
            run_command(rules, instance, options, *json)
        }),
        Commands::List { rules } => list_command(rules),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "xrule=debug" } else { "xrule=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_rules(path: &Path) -> Result<RuleSet> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read rule set {}", path.display()))?;
    RuleSet::from_json(&text).with_context(|| format!("cannot load rule set {}", path.display()))
}

fn load_instance(path: &Path) -> Result<MemoryDocument> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read instance {}", path.display()))?;
    MemoryDocument::from_json(&text)
        .with_context(|| format!("cannot load instance {}", path.display()))
}

fn load_options(path: Option<&Path>) -> Result<RunOptions> {
    let Some(path) = path else {
        return Ok(RunOptions::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read options {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid options {}", path.display()))
}

fn run_command(rules: &Path, instance: &Path, options: RunOptions, json: bool) -> Result<()> {
    let rule_set = load_rules(rules)?;
    let document = load_instance(instance)?;
    debug!(
        rules = rule_set.rules.len(),
        facts = xrule::DocumentGraph::facts(&document).len(),
        "inputs loaded"
    );

    let engine = Engine::new(Arc::new(document), rule_set, options)?;
    let report = engine.run()?;

    let formatter = Formatter::default();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", formatter.format_messages(&report));
    }
    for failed in report.failures() {
        if let Some(error) = &failed.error {
            eprintln!("{}", formatter.format_failure(&failed.rule, error));
        }
    }
    Ok(())
}

fn list_command(rules: &Path) -> Result<()> {
    let mut rule_set = load_rules(rules)?;
    xrule::analysis::analyze(&mut rule_set)?;
    let formatter = Formatter::default();
    print!("{}", formatter.format_rule_set(&rule_set));
    Ok(())
}
