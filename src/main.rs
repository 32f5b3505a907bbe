use std::{
    path::PathBuf,
    process::ExitCode,
};

use clap::{
    Parser,
    Subcommand,
};
use toeic_tutor::{
    core::utils::{
        display_date,
        display_datetime,
        history_sort_ts,
        now_ms,
    },
    logging,
    sync::{
        apply_to_store,
        export_store,
        Snapshot,
    },
    vocab,
    AppConfig,
    LocalStore,
    TutorError,
};
use tracing::error;

#[derive(Parser)]
#[command(name = "toeic-tutor", about = "Inspect and back up the TOEIC tutor store", version)]
struct Cli {
    /// Store directory (default: the configured data directory)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List saved words due for review now
    Due,

    /// List the vocabulary notebook, weakest words first
    Words,

    /// List history records, newest first
    History,

    /// Write a backup snapshot to a file
    Export {
        file: PathBuf,
    },

    /// Replace history and saved words with a backup snapshot
    Import {
        file: PathBuf,
    },

    /// Remove every word at the top mastery level
    ClearMastered,

    /// Write the effective configuration to the config file
    InitConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = AppConfig::load();
    logging::init(&config.log_filter);

    let store = LocalStore::open(cli.data_dir.unwrap_or_else(|| config.store_dir()));
    match run(cli.command, &config, &store).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &AppConfig, store: &LocalStore) -> Result<(), TutorError> {
    match command {
        Command::Due => {
            let due = store.get_words_due_at(now_ms()).await?;
            if due.is_empty() {
                println!("No words due.");
            }
            for word in due {
                println!("{:<24} level {}  {}", word.headword, word.level, word.translation);
            }
        }
        Command::Words => {
            let mut words = store.get_saved_words().await?;
            vocab::sorted_for_display(&mut words);
            for word in &words {
                println!(
                    "{:<24} level {}  next {}  {}",
                    word.headword,
                    word.level,
                    display_date(word.next_review),
                    word.translation
                );
            }
            println!("{} words, {} mastered", words.len(), vocab::mastered_words(&words).len());
        }
        Command::History => {
            for record in store.get_history().await? {
                println!(
                    "{:<8} {:<20} {:<22} {}",
                    record.kind(),
                    record.id().to_string(),
                    display_datetime(history_sort_ts(&record)),
                    record.title()
                );
            }
        }
        Command::Export { file } => {
            let snapshot = export_store(store).await?;
            tokio::fs::write(&file, snapshot.to_bytes()?).await?;
            println!(
                "Exported {} records and {} words to {}",
                snapshot.history_count(),
                snapshot.saved_word_count(),
                file.display()
            );
        }
        Command::Import { file } => {
            let snapshot = Snapshot::from_bytes(&tokio::fs::read(&file).await?)?;
            let (history, words) = (snapshot.history_count(), snapshot.saved_word_count());
            apply_to_store(store, snapshot).await?;
            println!("Imported {history} records and {words} words");
        }
        Command::ClearMastered => {
            let removed = vocab::clear_mastered(store).await?;
            println!("Removed {removed} mastered words");
        }
        Command::InitConfig => {
            let path = AppConfig::path();
            config.save_to(&path)?;
            println!("Wrote configuration to {}", path.display());
        }
    }
    Ok(())
}
