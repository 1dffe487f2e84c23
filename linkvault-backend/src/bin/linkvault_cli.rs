use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use linkvault::cleaning::{self, Cleaner};
use linkvault::config::{self, Config};
use linkvault::db::Database;
use linkvault::importer::HistoryImporter;
use linkvault::maintenance;
use linkvault::models::{ChannelRuleRequest, Provider};
use linkvault::parser::MessageParser;
use linkvault::providers::ProviderCatalog;
use linkvault::refresh::{touch_flag, write_paused};
use linkvault::rules::RuleCache;
use linkvault::store::LinkStore;

#[derive(Parser, Debug)]
#[command(name = "linkvault-cli", version, about = "Offline jobs and admin commands for linkvault")]
struct Cli {
    /// Database path (defaults to DATABASE_URL)
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay one channel's NDJSON export through rules and the store
    Backfill {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        input: PathBuf,
    },
    /// Batched import of a generic NDJSON export
    Import {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        commit_every: Option<usize>,
    },
    /// Clean raw exports (sampled by default)
    Clean(CleanArgs),
    /// Load cleaned NDJSON rows into the database
    LoadCleaned {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        commit_every: Option<usize>,
        /// Stop after this many stored rows
        #[arg(long)]
        limit: Option<u64>,
    },
    /// Keep only the newest message for every link
    DedupLinks,
    /// Manage per-channel suppression rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Manage monitored channels
    #[command(subcommand)]
    Channels(ChannelsCommand),
    /// Pause live ingestion
    Pause,
    /// Resume live ingestion
    Resume,
}

#[derive(Args, Debug)]
struct CleanArgs {
    /// Input files or glob patterns
    #[arg(required = true)]
    inputs: Vec<String>,
    /// Sample every Nth line
    #[arg(long, default_value_t = 1000)]
    interval: usize,
    /// Maximum sampled rows across all inputs
    #[arg(long, default_value_t = 2000)]
    limit: usize,
    /// Sample output path
    #[arg(long, default_value = "cleaned_sample.jsonl")]
    output: PathBuf,
    /// Clean every line instead of sampling
    #[arg(long)]
    full: bool,
    /// With --full, upsert into the database
    #[arg(long, requires = "full")]
    upsert: bool,
    /// NDJSON output for --full (required without --upsert)
    #[arg(long)]
    output_full: Option<PathBuf>,
    /// Keep rows whose links repeat an earlier row
    #[arg(long)]
    no_dedup: bool,
    #[arg(long)]
    commit_every: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    /// Create or replace the rule for a channel
    Add {
        #[arg(long)]
        channel: String,
        #[arg(long = "exclude-provider")]
        exclude_providers: Vec<String>,
        #[arg(long = "exclude-keyword")]
        exclude_keywords: Vec<String>,
        #[arg(long = "exclude-tag")]
        exclude_tags: Vec<String>,
    },
    List,
    Disable {
        id: i64,
    },
    Remove {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum ChannelsCommand {
    Add { name: String },
    Remove { name: String },
    List,
}

fn open_db(config: &Config, db: Option<&str>) -> Result<Arc<Database>, String> {
    let url = db.unwrap_or(&config.database_url);
    Database::with_busy_timeout(url, config.db_busy_timeout)
        .map(Arc::new)
        .map_err(|e| format!("Failed to open database {}: {}", url, e))
}

fn parser(config: &Config) -> Arc<MessageParser> {
    Arc::new(MessageParser::new(Arc::new(ProviderCatalog::load(&config.config_dir))))
}

fn open_input(path: &Path) -> Result<BufReader<File>, String> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| format!("Cannot open {:?}: {}", path, e))
}

fn notify(flag: &Path) {
    match touch_flag(flag) {
        Ok(()) => log::info!("Signalled running listener via {:?}", flag),
        Err(e) => log::warn!("Could not write refresh flag {:?}: {}", flag, e),
    }
}

fn run_clean(config: &Config, db: Option<&str>, args: CleanArgs) -> Result<(), String> {
    let cleaner = Cleaner::new(parser(config));
    let inputs = cleaning::expand_inputs(&args.inputs);
    log::info!("Cleaning {} input files", inputs.len());

    if !args.full {
        let rows = cleaner
            .sample(&inputs, args.interval, args.limit)
            .map_err(|e| format!("Sampling failed: {}", e))?;
        if rows.is_empty() {
            return Err("No usable rows sampled (no share links or unreadable inputs)".to_string());
        }
        let mut out = cleaning::create_output(&args.output).map_err(|e| format!("{:?}: {}", args.output, e))?;
        let written = cleaning::write_rows(&rows, &mut out)
            .and_then(|n| out.flush().map(|_| n))
            .map_err(|e| format!("{:?}: {}", args.output, e))?;
        println!("Wrote {} sampled rows to {:?}", written, args.output);
        return Ok(());
    }

    let mut copy = match &args.output_full {
        Some(path) => Some(cleaning::create_output(path).map_err(|e| format!("{:?}: {}", path, e))?),
        None => None,
    };

    let report = if args.upsert {
        let db = open_db(config, db)?;
        let commit_every = args.commit_every.unwrap_or(config.commit_every);
        let report = cleaner.clean_and_upsert(
            &inputs,
            &db,
            commit_every,
            copy.as_mut().map(|w| w as &mut dyn Write),
        )?;
        if let Some(out) = copy.as_mut() {
            out.flush().map_err(|e| e.to_string())?;
        }
        report
    } else {
        let out = copy
            .as_mut()
            .ok_or_else(|| "--full without --upsert needs --output-full".to_string())?;
        cleaner
            .clean_only(&inputs, out, !args.no_dedup)
            .map_err(|e| format!("Cleaning failed: {}", e))?
    };

    println!(
        "processed {}, kept {}, inserted {}, updated {}, duplicates {}, noise {}, without links {}, failed {}",
        report.stats.processed,
        report.rows_written,
        report.stats.inserted,
        report.stats.updated,
        report.stats.duplicates,
        report.noise,
        report.no_links,
        report.stats.failed
    );
    Ok(())
}

fn run_rules(config: &Config, db: &Database, command: RulesCommand) -> Result<(), String> {
    match command {
        RulesCommand::Add {
            channel,
            exclude_providers,
            exclude_keywords,
            exclude_tags,
        } => {
            if let Some(unknown) = exclude_providers.iter().find(|p| Provider::from_name(p).is_none()) {
                return Err(format!("Unknown provider '{}'", unknown));
            }
            let rule = db
                .upsert_channel_rule(&ChannelRuleRequest {
                    channel,
                    exclude_providers,
                    exclude_keywords,
                    exclude_tags,
                    enabled: true,
                })
                .map_err(|e| e.to_string())?;
            println!("Saved rule #{} for {}", rule.id, rule.channel);
        }
        RulesCommand::List => {
            for rule in db.list_channel_rules().map_err(|e| e.to_string())? {
                println!(
                    "#{} {} [{}] providers={:?} keywords={:?} tags={:?}",
                    rule.id,
                    rule.channel,
                    if rule.enabled { "on" } else { "off" },
                    rule.exclude_providers,
                    rule.exclude_keywords,
                    rule.exclude_tags
                );
            }
            return Ok(());
        }
        RulesCommand::Disable { id } => {
            if !db.set_channel_rule_enabled(id, false).map_err(|e| e.to_string())? {
                return Err(format!("Rule {} not found", id));
            }
            println!("Disabled rule #{}", id);
        }
        RulesCommand::Remove { id } => {
            if !db.delete_channel_rule(id).map_err(|e| e.to_string())? {
                return Err(format!("Rule {} not found", id));
            }
            println!("Removed rule #{}", id);
        }
    }
    notify(&config.rules_refresh_flag);
    Ok(())
}

fn run_channels(config: &Config, db: &Database, command: ChannelsCommand) -> Result<(), String> {
    match command {
        ChannelsCommand::Add { name } => {
            let added = db.add_monitored_channel(&name).map_err(|e| e.to_string())?;
            println!("{} {}", if added { "Added" } else { "Already monitoring" }, name);
        }
        ChannelsCommand::Remove { name } => {
            if !db.remove_monitored_channel(&name).map_err(|e| e.to_string())? {
                return Err(format!("Channel {} not found", name));
            }
            println!("Removed {}", name);
        }
        ChannelsCommand::List => {
            for channel in db.list_monitored_channels().map_err(|e| e.to_string())? {
                println!("{}", channel.username);
            }
            return Ok(());
        }
    }
    notify(&config.channels_refresh_flag);
    Ok(())
}

fn set_paused(config: &Config, paused: bool) -> Result<(), String> {
    write_paused(&config.control_file, paused)
        .map_err(|e| format!("Could not write {:?}: {}", config.control_file, e))?;
    println!("Ingestion {}", if paused { "paused" } else { "resumed" });
    Ok(())
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = Config::from_env();
    let db_override = cli.db.as_deref();

    match cli.command {
        Command::Backfill { channel, input } => {
            let db = open_db(&config, db_override)?;
            let importer = HistoryImporter::new(parser(&config));
            let rules = RuleCache::new();
            let stats = importer
                .backfill(&channel, open_input(&input)?, &LinkStore::new(db), &rules)
                .await
                .map_err(|e| format!("Backfill read failed: {}", e))?;
            println!(
                "{}: inserted {}, updated {}, skipped {}, suppressed {}, failed {}",
                channel, stats.inserted, stats.updated, stats.skipped, stats.suppressed, stats.failed
            );
        }
        Command::Import { input, commit_every } => {
            let db = open_db(&config, db_override)?;
            let importer = HistoryImporter::new(parser(&config));
            let stats = importer.import(
                open_input(&input)?,
                &db,
                commit_every.unwrap_or(config.commit_every),
            )?;
            println!(
                "processed {}, inserted {}, updated {}, skipped {}, failed {}",
                stats.processed, stats.inserted, stats.updated, stats.skipped, stats.failed
            );
        }
        Command::Clean(args) => run_clean(&config, db_override, args)?,
        Command::LoadCleaned {
            input,
            commit_every,
            limit,
        } => {
            let db = open_db(&config, db_override)?;
            let stats = cleaning::load_cleaned(
                open_input(&input)?,
                &db,
                commit_every.unwrap_or(config.commit_every),
                limit,
            )?;
            println!(
                "processed {}, inserted {}, updated {}, skipped {}, failed {}",
                stats.processed, stats.inserted, stats.updated, stats.skipped, stats.failed
            );
        }
        Command::DedupLinks => {
            let db = open_db(&config, db_override)?;
            let removed = maintenance::run_dedup(&db)?;
            println!("Removed {} duplicate messages", removed);
        }
        Command::Rules(command) => {
            let db = open_db(&config, db_override)?;
            run_rules(&config, &db, command)?;
        }
        Command::Channels(command) => {
            let db = open_db(&config, db_override)?;
            run_channels(&config, &db, command)?;
        }
        Command::Pause => set_paused(&config, true)?,
        Command::Resume => set_paused(&config, false)?,
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    config::init_logger();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
