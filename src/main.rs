use anyhow::{Context, Result};
use catsync::api::{Capability, Category, CategoryClient, NewCategory};
use catsync::config::Config;
use catsync::sync::{
    mount, AppState, EditOutcome, EditSession, LifecycleSignal, ListState, ListViewHandle,
    Notifier, UpdateRelay,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Get the config directory path (~/.config/catsync/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("catsync"))
}

#[derive(Parser, Debug)]
#[command(
    name = "catsync",
    about = "Keep a category list in sync with a REST backend of uncertain write support"
)]
struct Args {
    /// Config file (default: ~/.config/catsync/config.toml)
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Backend API root, overriding the config file
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print all categories
    List,
    /// Print one category
    Show { id: i64 },
    /// Discover which verbs the backend accepts
    Probe {
        /// Also scan candidate endpoints with safe verbs
        #[arg(long)]
        scan: bool,
    },
    /// Edit a category through the update strategy chain
    Edit {
        id: i64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Create a category
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        image_url: String,
    },
    /// Delete a category
    Delete { id: i64 },
    /// Keep the list in sync and accept commands on stdin
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => get_config_dir()?.join("config.toml"),
    };
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    tracing::debug!(config = ?config, "Effective configuration");

    let client = CategoryClient::from_config(&config).context("Invalid base URL")?;

    match args.command {
        Command::List => {
            let categories = client.list().await.context("Failed to load categories")?;
            print_categories(&categories);
        }
        Command::Show { id } => {
            let category = client
                .get(id)
                .await
                .with_context(|| format!("Failed to load category {}", id))?;
            print_categories(std::slice::from_ref(&category));
        }
        Command::Probe { scan } => probe(&client, scan).await,
        Command::Edit {
            id,
            name,
            image_url,
        } => {
            let session = EditSession::new(client, UpdateRelay::new());
            let original = session
                .load(id)
                .await
                .with_context(|| format!("Failed to load category {}", id))?;
            let name = name.unwrap_or_else(|| original.name.clone());
            let image_url = image_url.unwrap_or_else(|| original.image_url.clone());
            let outcome = session.submit(&original, &name, &image_url).await?;
            print_outcome(&outcome);
        }
        Command::Create { name, image_url } => {
            let created = client
                .create(&NewCategory { name, image_url })
                .await
                .context("Failed to create category")?;
            print_categories(std::slice::from_ref(&created));
        }
        Command::Delete { id } => {
            client
                .delete(id)
                .await
                .with_context(|| format!("Failed to delete category {}", id))?;
            println!("Deleted category {}", id);
        }
        Command::Watch => watch(client, config.refresh_interval()).await?,
    }

    Ok(())
}

async fn probe(client: &CategoryClient, scan: bool) {
    let verbs = client.prober().discover(client.record()).await;
    if verbs.is_empty() {
        println!("Discovery inconclusive; every update strategy stays eligible.");
    } else {
        let list: Vec<&str> = verbs.iter().map(|v| v.as_str()).collect();
        println!("Supported verbs: {}", list.join(", "));
    }

    println!("Update strategies (in order):");
    for strategy in client.chain().strategies() {
        let note = match client.record().get(strategy.verb) {
            Some(Capability::Supported) => "supported",
            Some(Capability::Unsupported) => "unsupported",
            None => "unknown",
        };
        println!("  {:<12} {:<6} {}", strategy.name, strategy.verb, note);
    }

    if scan {
        println!("Endpoint scan:");
        for report in client.prober().scan().await {
            let status = match &report.status {
                Ok(code) => code.to_string(),
                Err(e) => format!("error: {}", e),
            };
            match &report.allow {
                Some(allow) => println!(
                    "  {:<7} {:<40} {} (Allow: {})",
                    report.verb, report.path, status, allow
                ),
                None => println!("  {:<7} {:<40} {}", report.verb, report.path, status),
            }
        }
    }
}

fn print_categories(categories: &[Category]) {
    if categories.is_empty() {
        println!("(no categories)");
        return;
    }
    for category in categories {
        println!(
            "{:>5}  {:<30}  {}",
            category.id, category.name, category.image_url
        );
    }
}

fn print_outcome(outcome: &EditOutcome) {
    match outcome {
        EditOutcome::Unchanged(_) => println!("No changes."),
        EditOutcome::Saved { persisted, .. } => {
            println!(
                "Saved via {} after {} attempt(s).",
                persisted.strategy, persisted.attempts
            );
            print_categories(std::slice::from_ref(&persisted.category));
        }
    }
}

const WATCH_HELP: &str = "\
commands:
  r                     refresh now
  l                     print the list
  b | i | a             app goes to background / inactive / active
  name <id> <name>      rename a category
  image <id> <url>      change a category's image URL
  p                     show learned verb support
  q                     quit";

/// Mounts a list view and drives it from stdin until quit or a signal.
async fn watch(client: CategoryClient, interval: Duration) -> Result<()> {
    let lifecycle = LifecycleSignal::new(AppState::Active);
    let relay = UpdateRelay::new();
    let (notifier, mut toasts) = Notifier::channel(32);
    let session = EditSession::new(client.clone(), relay.clone());

    let handle = mount(
        client.clone(),
        lifecycle.subscribe(),
        relay.subscribe(),
        notifier,
        interval,
    );
    let mut state = handle.state();

    println!("{}", WATCH_HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // Signal handlers for graceful shutdown (Unix only)
    #[cfg(unix)]
    let mut sigterm = signal(SignalKind::terminate())?;
    #[cfg(unix)]
    let mut sigint = signal(SignalKind::interrupt())?;

    loop {
        #[cfg(unix)]
        let sigterm_fut = sigterm.recv();
        #[cfg(not(unix))]
        let sigterm_fut = std::future::pending::<Option<()>>();

        #[cfg(unix)]
        let sigint_fut = sigint.recv();
        #[cfg(not(unix))]
        let sigint_fut = std::future::pending::<Option<()>>();

        tokio::select! {
            biased;

            _ = sigterm_fut => {
                tracing::info!("Received SIGTERM, shutting down gracefully");
                break;
            }

            _ = sigint_fut => {
                tracing::info!("Received SIGINT, shutting down gracefully");
                break;
            }

            Some(toast) = toasts.recv() => println!("{}", toast),

            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                print_state(&current);
            }

            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let current = state.borrow().clone();
                if !handle_line(line.trim(), &current, &handle, &lifecycle, &session, &client).await {
                    break;
                }
            }
        }
    }

    let view = handle.teardown().await?;
    tracing::debug!(count = view.snapshot().len(), "Final snapshot");
    Ok(())
}

/// Handles one stdin command. Returns false to quit.
async fn handle_line(
    line: &str,
    state: &ListState,
    handle: &ListViewHandle,
    lifecycle: &LifecycleSignal,
    session: &EditSession,
    client: &CategoryClient,
) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    match command {
        "" => {}
        "q" | "quit" => return false,
        "r" => {
            if let Err(e) = handle.refresh().await {
                eprintln!("{}", e);
                return false;
            }
        }
        "l" => print_categories(&state.snapshot),
        "b" => lifecycle.set(AppState::Background),
        "i" => lifecycle.set(AppState::Inactive),
        "a" => lifecycle.set(AppState::Active),
        "p" => {
            for (verb, capability) in client.record().entries() {
                println!("  {:<7} {:?}", verb, capability);
            }
        }
        "name" | "image" => match parse_edit(command, rest, state) {
            Ok((original, name, image_url)) => {
                let session = session.clone();
                tokio::spawn(async move {
                    match session.submit(&original, &name, &image_url).await {
                        Ok(outcome) => print_outcome(&outcome),
                        Err(e) => eprintln!("Update failed: {}", e),
                    }
                });
            }
            Err(message) => eprintln!("{}", message),
        },
        other => eprintln!("Unknown command: {} (try r, l, b, i, a, name, image, p, q)", other),
    }
    true
}

/// Builds the edit for `name <id> <value>` / `image <id> <value>`.
fn parse_edit(
    command: &str,
    rest: &str,
    state: &ListState,
) -> Result<(Category, String, String), String> {
    let (id, value) = rest.trim().split_once(' ').unwrap_or((rest.trim(), ""));
    let id: i64 = id
        .parse()
        .map_err(|_| format!("Invalid category id: {:?}", id))?;
    let original = state
        .snapshot
        .iter()
        .find(|c| c.id == id)
        .cloned()
        .ok_or_else(|| format!("Category {} is not in the list", id))?;
    let value = value.trim().to_string();
    Ok(match command {
        "name" => (original.clone(), value, original.image_url),
        _ => (original.clone(), original.name, value),
    })
}

fn print_state(state: &ListState) {
    if state.refreshing {
        println!("Refreshing...");
    }
    if let Some(error) = &state.error {
        println!("{} (press r to retry)", error);
    }
    println!("{} categories", state.snapshot.len());
}
