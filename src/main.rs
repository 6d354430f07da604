use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use fitout::cache::{CacheResult, CacheSource, QueryCache, SqliteStorage};
use fitout::config::Config;
use fitout::feedback::{ConsoleFeedback, FanoutFeedback, Feedback, TracingFeedback};
use fitout::logging;
use fitout::model::{
  DependencyDraft, DependencyType, MaterialDraft, MaterialStatus, ScopeItemDraft,
  TimelineItemDraft, TimelineItemKind, TimelineItemPatch,
};
use fitout::mutation::{MutationError, Settled};
use fitout::services::{Services, Stores};
use fitout::store::RestStore;

#[derive(Parser, Debug)]
#[command(name = "fitout")]
#[command(about = "Project tracking for fit-out contractors, with optimistic updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fitout/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Project id to use instead of default_project
  #[arg(short, long, global = true)]
  project: Option<String>,

  /// Run against an in-process store seeded with demo data
  #[arg(long, global = true)]
  offline_demo: bool,

  /// Log to stderr instead of the log file
  #[arg(long, global = true)]
  log_stderr: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Timeline items (phases, tasks, milestones)
  Items {
    #[command(subcommand)]
    action: ItemsAction,
  },
  /// Dependencies between timeline items
  Deps {
    #[command(subcommand)]
    action: DepsAction,
  },
  /// Your notification inbox
  Notifications {
    #[command(subcommand)]
    action: NotificationsAction,
  },
  /// Materials schedule
  Materials {
    #[command(subcommand)]
    action: MaterialsAction,
  },
  /// Scope of works
  Scope {
    #[command(subcommand)]
    action: ScopeAction,
  },
  /// Project activity feed
  Activity {
    #[command(subcommand)]
    action: ActivityAction,
  },
  /// Local cache maintenance
  Cache {
    #[command(subcommand)]
    action: CacheAction,
  },
}

#[derive(Subcommand, Debug)]
enum ItemsAction {
  List,
  Add {
    name: String,
    #[arg(long, value_parser = parse_item_kind, default_value = "task")]
    kind: TimelineItemKind,
    #[arg(long)]
    parent: Option<String>,
    #[arg(long)]
    start: Option<NaiveDate>,
    #[arg(long)]
    end: Option<NaiveDate>,
  },
  Rename {
    id: String,
    name: String,
  },
  Progress {
    id: String,
    #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
    percent: u8,
  },
  Delete {
    id: String,
  },
  /// Move the given items, in this order, into the slots they occupy
  Reorder {
    #[arg(required = true)]
    ids: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum DepsAction {
  List,
  Add {
    source: String,
    target: String,
    #[arg(long = "type", value_parser = parse_dependency_type, default_value = "fs")]
    dependency_type: DependencyType,
  },
  Delete {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum NotificationsAction {
  List,
  Read { id: String },
  ReadAll,
  Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum MaterialsAction {
  List,
  Add {
    name: String,
    quantity: f64,
    unit: String,
  },
  Status {
    id: String,
    #[arg(value_parser = parse_material_status)]
    status: MaterialStatus,
  },
  Delete {
    id: String,
  },
  Reorder {
    #[arg(required = true)]
    ids: Vec<String>,
  },
}

#[derive(Subcommand, Debug)]
enum ScopeAction {
  List,
  Add {
    name: String,
    #[arg(long)]
    description: Option<String>,
  },
  Delete {
    id: String,
  },
}

#[derive(Subcommand, Debug)]
enum ActivityAction {
  List,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
  /// Drop every cached list, in memory and on disk
  Clear,
}

fn parse_item_kind(s: &str) -> std::result::Result<TimelineItemKind, String> {
  match s.to_lowercase().as_str() {
    "phase" => Ok(TimelineItemKind::Phase),
    "task" => Ok(TimelineItemKind::Task),
    "milestone" => Ok(TimelineItemKind::Milestone),
    other => Err(format!("unknown item kind '{}' (phase, task, milestone)", other)),
  }
}

fn parse_dependency_type(s: &str) -> std::result::Result<DependencyType, String> {
  match s.to_lowercase().as_str() {
    "fs" | "finish_to_start" => Ok(DependencyType::FinishToStart),
    "ss" | "start_to_start" => Ok(DependencyType::StartToStart),
    "ff" | "finish_to_finish" => Ok(DependencyType::FinishToFinish),
    "sf" | "start_to_finish" => Ok(DependencyType::StartToFinish),
    other => Err(format!("unknown dependency type '{}' (fs, ss, ff, sf)", other)),
  }
}

fn parse_material_status(s: &str) -> std::result::Result<MaterialStatus, String> {
  match s.to_lowercase().as_str() {
    "required" => Ok(MaterialStatus::Required),
    "ordered" => Ok(MaterialStatus::Ordered),
    "delivered" => Ok(MaterialStatus::Delivered),
    "installed" => Ok(MaterialStatus::Installed),
    other => Err(format!(
      "unknown status '{}' (required, ordered, delivered, installed)",
      other
    )),
  }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_stderr)?;

  let config = if args.offline_demo {
    Config::demo()
  } else {
    Config::load(args.config.as_deref())?
  };

  let policy = config.cache.policy()?;
  let cache = if config.cache.persist {
    QueryCache::with_storage(policy, Arc::new(SqliteStorage::open()?))
  } else {
    QueryCache::new(policy)
  };

  if let Command::Cache {
    action: CacheAction::Clear,
  } = args.command
  {
    cache.clear();
    println!("Cache cleared");
    return Ok(ExitCode::SUCCESS);
  }

  let stores = if args.offline_demo {
    Stores::demo(config.project(args.project.as_deref())?, config.user()?)
  } else {
    Stores::rest(RestStore::new(&config)?)
  };
  let feedback: Arc<dyn Feedback> = Arc::new(FanoutFeedback::new(vec![
    Box::new(ConsoleFeedback) as Box<dyn Feedback>,
    Box::new(TracingFeedback),
  ]));
  let services = Services::new(cache, stores, feedback);

  info!(command = ?args.command, demo = args.offline_demo, "running command");
  let project = args.project.as_deref();
  let outcome = run(&services, &config, project, args.command).await?;
  Ok(outcome)
}

async fn run(
  services: &Services,
  config: &Config,
  project: Option<&str>,
  command: Command,
) -> Result<ExitCode> {
  match command {
    Command::Items { action } => {
      let project = config.project(project)?;
      let timeline = &services.timeline;
      match action {
        ItemsAction::List => {
          let items = timeline.items(project).await?;
          print_source(&items);
          for item in &items.data {
            let indent = if item.parent_id.is_some() { "  " } else { "" };
            println!(
              "{:<16} {}{:<32} {:<9} {:>3}%  {} → {}",
              item.id,
              indent,
              item.name,
              format!("{:?}", item.kind).to_lowercase(),
              item.progress,
              date_or_dash(item.start_date),
              date_or_dash(item.end_date),
            );
          }
          Ok(ExitCode::SUCCESS)
        }
        ItemsAction::Add {
          name,
          kind,
          parent,
          start,
          end,
        } => settled(
          timeline
            .create_item(TimelineItemDraft {
              project_id: project.to_string(),
              parent_id: parent,
              name,
              kind,
              start_date: start,
              end_date: end,
            })
            .await,
        ),
        ItemsAction::Rename { id, name } => settled(
          timeline
            .update_item(project, &id, TimelineItemPatch::rename(name))
            .await,
        ),
        ItemsAction::Progress { id, percent } => settled(
          timeline
            .update_item(project, &id, TimelineItemPatch::progress(percent))
            .await,
        ),
        ItemsAction::Delete { id } => settled(timeline.delete_item(project, &id).await),
        ItemsAction::Reorder { ids } => settled(timeline.reorder_items(project, ids).await),
      }
    }

    Command::Deps { action } => {
      let project = config.project(project)?;
      let timeline = &services.timeline;
      match action {
        DepsAction::List => {
          let deps = timeline.dependencies(project).await?;
          print_source(&deps);
          for dep in &deps.data {
            println!(
              "{:<16} {} → {} ({:?})",
              dep.id, dep.source_id, dep.target_id, dep.dependency_type
            );
          }
          Ok(ExitCode::SUCCESS)
        }
        DepsAction::Add {
          source,
          target,
          dependency_type,
        } => settled(
          timeline
            .create_dependency(DependencyDraft {
              project_id: project.to_string(),
              source_id: source,
              target_id: target,
              dependency_type,
            })
            .await,
        ),
        DepsAction::Delete { id } => settled(timeline.delete_dependency(project, &id).await),
      }
    }

    Command::Notifications { action } => {
      let user = config.user()?;
      let inbox = &services.notifications;
      match action {
        NotificationsAction::List => {
          let notifications = inbox.list(user).await?;
          print_source(&notifications);
          for n in &notifications.data {
            let marker = if n.read { " " } else { "●" };
            println!(
              "{} {:<16} {:<24} {}  ({})",
              marker,
              n.id,
              n.title,
              n.message,
              age(n.created_at)
            );
          }
          Ok(ExitCode::SUCCESS)
        }
        NotificationsAction::Read { id } => settled(inbox.mark_read(user, &id).await),
        NotificationsAction::ReadAll => {
          let report = inbox.mark_all_read(user).await?;
          println!("Marked {} notification(s) as read", report.marked);
          if report.failed.is_empty() {
            Ok(ExitCode::SUCCESS)
          } else {
            Ok(ExitCode::FAILURE)
          }
        }
        NotificationsAction::Delete { id } => settled(inbox.delete(user, &id).await),
      }
    }

    Command::Materials { action } => {
      let project = config.project(project)?;
      let materials = &services.materials;
      match action {
        MaterialsAction::List => {
          let list = materials.list(project).await?;
          print_source(&list);
          for m in &list.data {
            println!(
              "{:<16} {:<32} {:>8} {:<6} {:?}",
              m.id, m.name, m.quantity, m.unit, m.status
            );
          }
          Ok(ExitCode::SUCCESS)
        }
        MaterialsAction::Add {
          name,
          quantity,
          unit,
        } => settled(
          materials
            .create(MaterialDraft {
              project_id: project.to_string(),
              name,
              quantity,
              unit,
            })
            .await,
        ),
        MaterialsAction::Status { id, status } => {
          settled(materials.set_status(project, &id, status).await)
        }
        MaterialsAction::Delete { id } => settled(materials.delete(project, &id).await),
        MaterialsAction::Reorder { ids } => settled(materials.reorder(project, ids).await),
      }
    }

    Command::Scope { action } => {
      let project = config.project(project)?;
      let scope = &services.scope;
      match action {
        ScopeAction::List => {
          let items = scope.list(project).await?;
          print_source(&items);
          for s in &items.data {
            println!(
              "{:<16} {:<32} {:?}  {}",
              s.id,
              s.name,
              s.status,
              s.description.as_deref().unwrap_or("")
            );
          }
          Ok(ExitCode::SUCCESS)
        }
        ScopeAction::Add { name, description } => settled(
          scope
            .create(ScopeItemDraft {
              project_id: project.to_string(),
              name,
              description,
            })
            .await,
        ),
        ScopeAction::Delete { id } => settled(scope.delete(project, &id).await),
      }
    }

    Command::Activity {
      action: ActivityAction::List,
    } => {
      let project = config.project(project)?;
      let feed = services.activity.list(project).await?;
      print_source(&feed);
      for entry in &feed.data {
        println!(
          "{:<10} {} {} {}",
          age(entry.created_at),
          entry.action,
          entry.entity_type,
          entry.entity_id.as_deref().unwrap_or("")
        );
      }
      Ok(ExitCode::SUCCESS)
    }

    Command::Cache { .. } => Err(eyre!("cache commands run before the store is opened")),
  }
}

/// Print the confirmed record; the feedback surface has already reported the outcome.
fn settled<R: std::fmt::Debug>(result: std::result::Result<Settled<R>, MutationError>) -> Result<ExitCode> {
  match result {
    Ok(settled) => {
      if let Some(record) = settled.record() {
        println!("{:#?}", record);
      }
      Ok(ExitCode::SUCCESS)
    }
    Err(_) => Ok(ExitCode::FAILURE),
  }
}

fn print_source<T>(result: &CacheResult<T>) {
  match (result.source, result.cached_at) {
    (CacheSource::Network, _) => {}
    (CacheSource::Offline, Some(at)) => eprintln!("(offline, showing data from {} ago)", age(at)),
    (_, Some(at)) => eprintln!("(cached {} ago)", age(at)),
    (_, None) => {}
  }
}

fn date_or_dash(date: Option<NaiveDate>) -> String {
  date.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string())
}

fn age(at: chrono::DateTime<Utc>) -> impl Display {
  let secs = (Utc::now() - at).num_seconds().max(0);
  match secs {
    s if s < 60 => format!("{}s", s),
    s if s < 3600 => format!("{}m", s / 60),
    s if s < 86_400 => format!("{}h", s / 3600),
    s => format!("{}d", s / 86_400),
  }
}
