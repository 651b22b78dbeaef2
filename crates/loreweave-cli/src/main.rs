#![deny(unsafe_code)]

//! Loreweave CLI: run the ordering pipeline over turn files and edit
//! lorebook settings.

mod turn;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use loreweave_config::tiers::tiers_from_overrides;
use loreweave_config::{AppConfig, BudgetSeam, CharacterOverride, GroupSettings, Priority};
use loreweave_core::{
    FileStore, GlobalBudgetContext, HeuristicCounter, Orchestrator, SettingsStore,
    SpeakingContext, TurnOutcome, WarningCollector, WarningReader, allocate, resolve,
    trim_with_report,
};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::turn::{LayeredStore, TurnFile, TurnReport};

/// Loreweave: priority ordering and token budgets for lorebook entries.
#[derive(Parser)]
#[command(name = "loreweave", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "loreweave.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Order and budget the entries of a turn file.
    Order {
        turn: PathBuf,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove a turn's dropped entries from a rendered prompt.
    Trim {
        turn: PathBuf,

        /// Prompt rendered with every entry of the turn.
        prompt: PathBuf,
    },

    /// Validate the configuration and every lorebook document.
    Check,

    /// Show the resolved settings of one or all lorebooks.
    ShowSettings {
        lorebook: Option<String>,

        /// Resolve as if this character were speaking.
        #[arg(long)]
        speaker: Option<String>,
    },

    /// Set a lorebook's priority, or one character's priority within it.
    SetPriority {
        lorebook: String,

        /// 1 (lowest) to 5 (highest).
        priority: i64,

        #[arg(long)]
        character: Option<String>,

        /// Order adjustment to store alongside the priority.
        #[arg(long, allow_hyphen_values = true)]
        adjustment: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;

    let filter = log_filter(cli.verbose, &config);
    let collector = WarningCollector::new(64);
    let warnings = collector.reader();
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(collector)
        .init();

    let store = LayeredStore {
        documents: FileStore::new(lorebook_dir(&cli.config, &config)),
        configured: config.group_settings()?,
    };

    match cli.command {
        Commands::Order { turn, json } => cmd_order(&config, &store, &turn, json, &warnings).await?,
        Commands::Trim { turn, prompt } => cmd_trim(&config, &store, &turn, &prompt).await?,
        Commands::Check => cmd_check(&cli.config, &store.documents).await?,
        Commands::ShowSettings { lorebook, speaker } => {
            cmd_show_settings(&config, &store, lorebook, speaker).await?
        }
        Commands::SetPriority {
            lorebook,
            priority,
            character,
            adjustment,
        } => cmd_set_priority(&store, &lorebook, priority, character, adjustment).await?,
    }

    Ok(())
}

async fn run_turn(
    config: &AppConfig,
    store: &LayeredStore,
    turn_path: &Path,
    seam: BudgetSeam,
) -> Result<TurnOutcome> {
    let turn = TurnFile::load(turn_path).await?;
    let mut ordering = config.ordering.clone();
    ordering.seam = seam;

    let mut orchestrator = Orchestrator::new(ordering);
    orchestrator.on_conversation_changed();
    for _ in 0..turn.generation.max(1) {
        orchestrator.on_generation_started();
    }
    if let Some(speaker) = turn.speaker_key() {
        orchestrator.on_speaker_drafted(&speaker);
    }

    let entries = turn.sources.combined();
    info!(entries = entries.len(), "running turn");
    let global = GlobalBudgetContext::from(&config.budget);
    let outcome = orchestrator
        .run_turn(store, entries, &global, &HeuristicCounter)
        .await;
    orchestrator.on_generation_ended();
    Ok(outcome)
}

async fn cmd_order(
    config: &AppConfig,
    store: &LayeredStore,
    turn: &Path,
    json: bool,
    warnings: &WarningReader,
) -> Result<()> {
    let outcome = run_turn(config, store, turn, config.ordering.seam).await?;
    let report = TurnReport::from(&outcome);

    if json {
        let mut report = report;
        report.warnings = warnings.drain().iter().map(ToString::to_string).collect();
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("{:>4}  {:>6}  {:>8}  {:<9}  LOREBOOK", "#", "UID", "ORDER", "STATUS");
    for (position, row) in report.entries.iter().enumerate() {
        println!(
            "{:>4}  {:>6}  {:>8}  {:<9}  {}",
            position + 1,
            row.uid.map(|u| u.to_string()).unwrap_or_else(|| "-".into()),
            row.effective_order
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".into()),
            row.status,
            row.group.as_deref().unwrap_or("-"),
        );
    }
    for (group, usage) in &report.usage {
        if usage.is_unlimited() {
            println!("{group}: {} admitted, no budget", usage.admitted);
        } else {
            println!(
                "{group}: {}/{} tokens, {} admitted, {} dropped",
                usage.used, usage.ceiling, usage.admitted, usage.dropped
            );
        }
    }
    for notice in &report.notices {
        eprintln!("notice: {notice}");
    }
    for line in warning_lines(warnings) {
        eprintln!("{line}");
    }
    Ok(())
}

/// Drain captured warnings into printable lines.
fn warning_lines(warnings: &WarningReader) -> Vec<String> {
    warnings
        .drain()
        .iter()
        .map(|w| format!("{}: {w}", w.level.as_str().to_lowercase()))
        .collect()
}

async fn cmd_trim(config: &AppConfig, store: &LayeredStore, turn: &Path, prompt: &Path) -> Result<()> {
    let outcome = run_turn(config, store, turn, BudgetSeam::Textual).await?;
    let rendered = tokio::fs::read_to_string(prompt)
        .await
        .with_context(|| format!("failed to read prompt {}", prompt.display()))?;

    let (trimmed, report) = trim_with_report(&rendered, &outcome.dropped);
    print!("{trimmed}");
    for removal in &report.removals {
        eprintln!(
            "removed entry {} ({}) x{}",
            removal.uid.map(|u| u.to_string()).unwrap_or_else(|| "-".into()),
            removal.group.as_deref().unwrap_or("-"),
            removal.occurrences
        );
    }
    Ok(())
}

async fn cmd_check(config_path: &Path, documents: &FileStore) -> Result<()> {
    let mut problems = 0;
    for name in documents.list().await? {
        match documents.load(&name).await {
            Ok(Some(settings)) => {
                if let Err(e) = settings.validate(&name) {
                    eprintln!("{}: {e}", documents.document_path(&name)?.display());
                    problems += 1;
                }
            }
            Ok(None) => {}
            Err(e) => {
                eprintln!("{e}");
                problems += 1;
            }
        }
    }
    if problems > 0 {
        bail!("{problems} lorebook document(s) failed validation");
    }
    println!("Configuration at '{}' is valid.", config_path.display());
    Ok(())
}

async fn cmd_show_settings(
    config: &AppConfig,
    store: &LayeredStore,
    lorebook: Option<String>,
    speaker: Option<String>,
) -> Result<()> {
    let names = match lorebook {
        Some(name) => vec![name],
        None => {
            let mut names = store.documents.list().await?;
            names.extend(store.configured.keys().cloned());
            names.sort();
            names.dedup();
            names
        }
    };
    let speaking = match speaker {
        Some(name) => SpeakingContext::speaking(name),
        None => SpeakingContext::single_party(),
    };
    let global = GlobalBudgetContext::from(&config.budget);

    for name in names {
        let stored = store.load(&name).await?.unwrap_or_default();
        let resolved = resolve(&stored, &speaking);
        println!("[{name}]");
        println!("  priority          {}", resolved.priority);
        println!("  order adjustment  {}", resolved.order_adjustment);
        println!(
            "  budget            {} {} (ceiling {})",
            resolved.budget_mode,
            resolved.budget_value,
            allocate(&resolved, &global)
        );
        if resolved.only_when_speaking {
            println!("  only when speaking (active: {})", resolved.is_active());
        }
        for tier in tiers_from_overrides(&stored.character_overrides) {
            let label = Priority::new(tier.priority)
                .map(|p| p.to_string())
                .unwrap_or_else(|| tier.priority.to_string());
            println!("  tier {label}: {}", tier.characters.join(", "));
        }
    }
    Ok(())
}

async fn cmd_set_priority(
    store: &LayeredStore,
    lorebook: &str,
    priority: i64,
    character: Option<String>,
    adjustment: Option<i64>,
) -> Result<()> {
    let Some(tier) = Priority::new(priority) else {
        bail!("priority must be between 1 and 5, got {priority}");
    };
    let mut settings: GroupSettings = store.load(lorebook).await?.unwrap_or_default();

    match &character {
        Some(name) => {
            let entry = settings
                .character_overrides
                .entry(name.clone())
                .or_insert_with(CharacterOverride::default);
            entry.priority = Some(tier.into());
            if adjustment.is_some() {
                entry.order_adjustment = adjustment;
            }
        }
        None => {
            settings.priority = Some(tier.into());
            if adjustment.is_some() {
                settings.order_adjustment = adjustment;
            }
        }
    }

    store.save(lorebook, settings).await?;
    match character {
        Some(name) => println!("{lorebook}: {name} set to priority {tier}"),
        None => println!("{lorebook}: priority set to {tier}"),
    }
    Ok(())
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load(path)
            .await
            .with_context(|| format!("failed to load {}", path.display()))
    } else {
        Ok(AppConfig::default())
    }
}

/// `-v` flags win over the configured level.
fn log_filter(verbose: u8, config: &AppConfig) -> &str {
    match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    }
}

/// The lorebook directory, relative to the config file's directory.
fn lorebook_dir(config_path: &Path, config: &AppConfig) -> PathBuf {
    let dir = Path::new(&config.store.lorebook_dir);
    match config_path.parent() {
        Some(parent) if dir.is_relative() => parent.join(dir),
        _ => dir.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loreweave_config::{BudgetMode, InsertionStrategy, LorebookConfig};
    use loreweave_core::Notice;
    use loreweave_test_utils::{TestConfigBuilder, TestStore};
    use pretty_assertions::assert_eq;
    use tracing::warn;

    async fn write_turn(fixture: &TestStore, body: &str) -> PathBuf {
        let path = fixture.dir().join("turn.toml");
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    fn configured_store(fixture: &TestStore, config: &AppConfig) -> LayeredStore {
        LayeredStore {
            documents: FileStore::new(fixture.dir()),
            configured: config.group_settings().unwrap(),
        }
    }

    #[test]
    fn test_cli_parses_set_priority() {
        let cli = Cli::try_parse_from([
            "loreweave",
            "set-priority",
            "Eldoria",
            "4",
            "--character",
            "Nova",
            "--adjustment",
            "-250",
        ])
        .unwrap();
        match cli.command {
            Commands::SetPriority {
                lorebook,
                priority,
                character,
                adjustment,
            } => {
                assert_eq!(lorebook, "Eldoria");
                assert_eq!(priority, 4);
                assert_eq!(character.as_deref(), Some("Nova"));
                assert_eq!(adjustment, Some(-250));
            }
            _ => panic!("expected set-priority"),
        }
    }

    #[test]
    fn test_lorebook_dir_relative_to_config() {
        let config = TestConfigBuilder::new().lorebook_dir("books").build();
        assert_eq!(
            lorebook_dir(Path::new("/srv/loreweave/loreweave.toml"), &config),
            PathBuf::from("/srv/loreweave/books")
        );
        let absolute = TestConfigBuilder::new().lorebook_dir("/data/books").build();
        assert_eq!(
            lorebook_dir(Path::new("loreweave.toml"), &absolute),
            PathBuf::from("/data/books")
        );
    }

    #[tokio::test]
    async fn test_set_priority_writes_document() {
        let fixture = TestStore::empty();
        let store = LayeredStore {
            documents: FileStore::new(fixture.dir()),
            configured: Default::default(),
        };

        cmd_set_priority(&store, "Eldoria", 2, None, Some(100)).await.unwrap();
        cmd_set_priority(&store, "Eldoria", 5, Some("Nova".into()), None)
            .await
            .unwrap();

        let doc = fixture.read_document("Eldoria").await;
        assert_eq!(doc["loreweave"]["priority"], 2);
        assert_eq!(doc["loreweave"]["order_adjustment"], 100);
        assert_eq!(doc["loreweave"]["character_overrides"]["Nova"]["priority"], 5);

        assert!(cmd_set_priority(&store, "Eldoria", 9, None, None).await.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_run_turn_from_files() {
        let fixture = TestStore::empty();
        let turn_path = fixture.dir().join("turn.toml");
        tokio::fs::write(
            &turn_path,
            r#"
[[global]]
uid = 1
group = "Low"
content = "low"
base_order = 900

[[global]]
uid = 2
group = "High"
content = "high"
base_order = 1
"#,
        )
        .await
        .unwrap();

        let config = TestConfigBuilder::new().build();
        let store = LayeredStore {
            documents: FileStore::new(fixture.dir()),
            configured: [
                (
                    "High".to_string(),
                    GroupSettings {
                        priority: Some(5),
                        ..GroupSettings::default()
                    },
                ),
            ]
            .into(),
        };

        let outcome = run_turn(&config, &store, &turn_path, BudgetSeam::Structural)
            .await
            .unwrap();
        let uids: Vec<_> = outcome.entries.iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![Some(2), Some(1)]);
    }

    #[test]
    fn test_verbosity_overrides_configured_level() {
        let config = TestConfigBuilder::new().log_level("warn").build();
        assert_eq!(log_filter(0, &config), "warn");
        assert_eq!(log_filter(1, &config), "debug");
        assert_eq!(log_filter(3, &config), "trace");
    }

    #[test]
    fn test_warning_lines_drain_collector() {
        let collector = WarningCollector::new(8);
        let reader = collector.reader();
        let guard = tracing_subscriber::registry().with(collector).set_default();
        warn!(group = "Broken", "lorebook settings unreadable");
        drop(guard);

        assert_eq!(
            warning_lines(&reader),
            vec!["warn: lorebook settings unreadable group=Broken".to_string()]
        );
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_textual_seam_keeps_entries_and_reports_drops() {
        let fixture = TestStore::empty();
        let turn_path = write_turn(
            &fixture,
            &format!(
                "[[global]]\nuid = 1\ngroup = \"G\"\ncontent = \"{}\"\nbase_order = 900\n\n\
                 [[global]]\nuid = 2\ngroup = \"G\"\ncontent = \"{}\"\nbase_order = 1\n",
                "a".repeat(64),
                "b".repeat(32),
            ),
        )
        .await;

        // Global budget: 10% of 1000, capped at 40. Half of that is 20 tokens.
        let config = TestConfigBuilder::new()
            .max_context_tokens(1000)
            .global_budget_percent(10)
            .global_budget_cap(40)
            .seam(BudgetSeam::Textual)
            .lorebook(
                "G",
                LorebookConfig {
                    budget_mode: Some(BudgetMode::PercentOfGlobalBudget),
                    budget_value: Some(50.0),
                    ..LorebookConfig::default()
                },
            )
            .build();
        let store = configured_store(&fixture, &config);

        let outcome = run_turn(&config, &store, &turn_path, config.ordering.seam)
            .await
            .unwrap();
        assert_eq!(outcome.entries.len(), 2);
        let dropped: Vec<_> = outcome.dropped.iter().map(|e| e.uid).collect();
        assert_eq!(dropped, vec![Some(2)]);
        assert_eq!(outcome.usage["G"].ceiling, 20);
        assert_eq!(outcome.usage["G"].used, 16);

        let report = TurnReport::from(&outcome);
        let statuses: Vec<_> = report.entries.iter().map(|r| r.status).collect();
        assert_eq!(statuses, vec!["admitted", "dropped"]);
    }

    #[tokio::test]
    async fn test_non_evenly_strategy_passes_turn_through() {
        let fixture = TestStore::empty();
        let turn_path = write_turn(
            &fixture,
            r#"
generation = 2

[[global]]
uid = 1
group = "Low"
content = "low"
base_order = 900

[[global]]
uid = 2
group = "High"
content = "high"
base_order = 1
"#,
        )
        .await;

        let config = TestConfigBuilder::new()
            .insertion_strategy(InsertionStrategy::CharacterFirst)
            .lorebook(
                "High",
                LorebookConfig {
                    priority: Some(5),
                    ..LorebookConfig::default()
                },
            )
            .build();
        let store = configured_store(&fixture, &config);

        let outcome = run_turn(&config, &store, &turn_path, BudgetSeam::Structural)
            .await
            .unwrap();
        let uids: Vec<_> = outcome.entries.iter().map(|e| e.uid).collect();
        assert_eq!(uids, vec![Some(1), Some(2)]);
        assert_eq!(
            outcome.notices,
            vec![Notice::StrategyMismatch {
                strategy: InsertionStrategy::CharacterFirst,
            }]
        );
    }
}
