use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use octocache::cache::{
  CacheDataManager, CacheManager, SearchItem, UpdateKind, UpdateSubscription, UpdateTarget,
};
use octocache::config::Config;
use octocache::db::Database;
use octocache::github::{AccountProvider, PullRequestInfo, StaticAccounts};
use octocache::store::{issue, pull_request, repository, search, SearchKind, SearchQuery};
use octocache::sync::SyncEngine;

#[derive(Parser, Debug)]
#[command(name = "octocache")]
#[command(about = "A local cache of GitHub issues and pull requests")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/octocache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Refresh every saved search and repository once
  Sync,
  /// Show the issues of a search
  Issues { name: String, query: String },
  /// Show the pull requests of a search
  Pulls { name: String, query: String },
  /// Show issues and pull requests of a search in update order
  Items { name: String, query: String },
  /// Refresh one repository (owner/name)
  Repo { full_name: String },
  /// Keep the cache fresh until interrupted
  Watch,
  /// Delete all cached data
  Reset,
  /// Show what the cache holds
  Status,
}

struct App {
  db: Arc<Database>,
  manager: CacheManager,
  data: CacheDataManager,
}

impl App {
  fn new(config: Config) -> Result<Self> {
    let db = Arc::new(Database::open(&config.cache.database_options())?);
    let accounts: Arc<dyn AccountProvider> = Arc::new(StaticAccounts::from_config(&config.github)?);

    let sync_options = config.cache.sync_options();
    let manager_options = config.cache.manager_options();
    let first_fetch_timeout = config.cache.first_fetch_timeout();

    let engine = SyncEngine::new(db.clone(), accounts.clone(), Arc::new(config), sync_options);
    let manager = CacheManager::new(db.clone(), Arc::new(engine), manager_options);
    let data = CacheDataManager::new(db.clone(), manager.clone(), accounts, first_fetch_timeout);

    Ok(Self { db, manager, data })
  }

  /// Request `target` and wait for its outcome.
  async fn refresh_and_wait(&self, target: UpdateTarget) -> Result<()> {
    let mut updates = self.manager.subscribe();
    self.manager.refresh(target.clone())?;
    wait_until_done(&mut updates, &target).await
  }

  async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Sync => {
        self.refresh_and_wait(UpdateTarget::All).await?;
        println!("Cache updated");
      }
      Command::Issues { name, query } => {
        let query = SearchQuery::new(name, query, SearchKind::Issues);
        for issue in self.data.get_issues(&query).await? {
          println!("#{:<6} {:<8} {}  {}", issue.number, issue.state, issue.title, issue.html_url);
        }
      }
      Command::Pulls { name, query } => {
        let query = SearchQuery::new(name, query, SearchKind::PullRequests);
        let pulls = self.data.get_pull_requests(&query).await?;
        let branches = join_all(pulls.iter().map(|pr| pr.source_branch())).await;
        for (pr, branch) in pulls.iter().zip(branches) {
          println!(
            "#{:<6} {:<8} {} [{}]  {}",
            pr.number(),
            pr.state(),
            pr.title(),
            branch,
            pr.html_url()
          );
        }
      }
      Command::Items { name, query } => {
        let query = SearchQuery::new(name, query, SearchKind::IssuesAndPullRequests);
        for item in self.data.get_items(&query).await? {
          match item {
            SearchItem::Issue(issue) => {
              println!("issue #{:<6} {}  {}", issue.number, issue.title, issue.html_url)
            }
            SearchItem::PullRequest(pr) => {
              println!("pr    #{:<6} {}  {}", pr.number(), pr.title(), pr.html_url())
            }
          }
        }
      }
      Command::Repo { full_name } => {
        self
          .refresh_and_wait(UpdateTarget::Repository(full_name.clone()))
          .await?;
        let (owner, name) = full_name
          .split_once('/')
          .ok_or_else(|| eyre!("Invalid repository name: {}", full_name))?;
        let (issues, pulls) = self.db.read(|conn| {
          match repository::get_by_full_name(conn, owner, name)? {
            Some(repo) => Ok((
              issue::for_repository(conn, repo.id)?.len(),
              pull_request::for_repository(conn, repo.id)?.len(),
            )),
            None => Ok((0, 0)),
          }
        })?;
        println!("{}: {} issues, {} pull requests", full_name, issues, pulls);
      }
      Command::Watch => {
        let mut updates = self.manager.subscribe();
        self.manager.start_periodic();
        println!("Watching; press Ctrl-C to stop");
        loop {
          tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = updates.recv() => match event {
              Some(event) => match event.message {
                Some(message) => println!("{:?} {}: {}", event.kind, event.target, message),
                None => println!("{:?} {}", event.kind, event.target),
              },
              None => break,
            },
          }
        }
        self.manager.stop_periodic();
      }
      Command::Reset => {
        self.manager.clear_cache()?;
        println!("Cache cleared");
      }
      Command::Status => {
        let (searches, repositories) =
          self.db.read(|conn| Ok((search::all(conn)?, repository::all(conn)?)))?;
        match self.manager.last_updated()? {
          Some(last) => println!("Last updated: {}", last.to_rfc3339()),
          None => println!("Last updated: never"),
        }
        println!("Repositories: {}", repositories.len());
        println!("Searches: {}", searches.len());
        for s in searches {
          println!("  {} ({})", s.name, s.query);
        }
      }
    }

    // Reads schedule a background refresh; a one-shot command does not wait for it.
    self.manager.cancel_update_in_progress();
    Ok(())
  }
}

async fn wait_until_done(updates: &mut UpdateSubscription, target: &UpdateTarget) -> Result<()> {
  while let Some(event) = updates.recv().await {
    if &event.target != target {
      continue;
    }
    match event.kind {
      UpdateKind::Success => return Ok(()),
      UpdateKind::Cancel => return Err(eyre!("Update of {} was cancelled", target)),
      UpdateKind::Error => {
        let message = event.message.unwrap_or_else(|| "unknown error".to_string());
        return Err(eyre!("Update of {} failed: {}", target, message));
      }
      UpdateKind::Cleared => {}
    }
  }
  Err(eyre!("Cache manager stopped"))
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let log_dir = config
    .logging
    .directory
    .clone()
    .unwrap_or_else(|| config.cache.data_folder());
  let _guard = octocache::logging::init(&log_dir, config.logging.filter.as_deref())?;
  info!(command = ?args.command, "octocache starting");

  let app = App::new(config)?;
  app.run(args.command).await
}
