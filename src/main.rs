use std::sync::Arc;

use ideaflow::clock::SystemClock;
use ideaflow::config::AppConfig;
use ideaflow::db;
use ideaflow::engine::{Actor, TransitionEngine};
use ideaflow::models::approver::PgDirectory;
use ideaflow::models::idea::PgIdeaStore;
use ideaflow::models::workflow::PgWorkflowStore;
use ideaflow::notify::{LogNotifier, NotificationDispatcher};
use ideaflow::store::WorkflowStore;

const USAGE: &str = "usage: ideaflow [migrate|seed|workflows|pending <user_id>|submit <idea_id> <user_id>]";

enum Command {
    Migrate,
    Seed,
    Workflows,
    Pending { user_id: i64 },
    Submit { idea_id: i64, user_id: i64 },
}

fn parse_args(args: &[String]) -> Option<Command> {
    let id = |i: usize| args.get(i).and_then(|v| v.parse::<i64>().ok());
    match args.first().map(String::as_str) {
        None | Some("migrate") => Some(Command::Migrate),
        Some("seed") => Some(Command::Seed),
        Some("workflows") => Some(Command::Workflows),
        Some("pending") => Some(Command::Pending { user_id: id(1)? }),
        Some("submit") => Some(Command::Submit {
            idea_id: id(1)?,
            user_id: id(2)?,
        }),
        Some(_) => None,
    }
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = parse_args(&args) else {
        eprintln!("{USAGE}");
        std::process::exit(2);
    };

    let config = AppConfig::from_env().expect("Invalid configuration");
    let pool = db::init_pool(&config).await.expect("Failed to create DB pool");

    // Schema first, whatever the command
    db::run_migrations(&pool).await.expect("Failed to run migrations");

    if matches!(command, Command::Seed) || config.seed_default_workflows {
        db::seed_default_workflows(&pool)
            .await
            .expect("Failed to seed default workflows");
    }

    match command {
        Command::Migrate | Command::Seed => {}
        Command::Workflows => {
            let workflows = PgWorkflowStore::new(pool.clone())
                .get_all_active()
                .await
                .expect("Failed to load workflows");
            if workflows.is_empty() {
                println!("No active workflows");
            }
            for w in &workflows {
                println!(
                    "#{:<4} priority {:<5} {:<32} stages {:?} conditions {}",
                    w.id,
                    w.priority,
                    w.name,
                    w.stages.iter().map(|s| s.stage).collect::<Vec<_>>(),
                    w.conditions.iter().filter(|c| c.is_active).count()
                );
            }
        }
        Command::Pending { .. } | Command::Submit { .. } => {
            let (notifications, handle) =
                NotificationDispatcher::spawn(Arc::new(LogNotifier), config.notify_queue_capacity);
            let engine = TransitionEngine::new(
                Arc::new(PgIdeaStore::new(pool.clone())),
                Arc::new(PgWorkflowStore::new(pool.clone())),
                Arc::new(PgDirectory::new(pool.clone())),
                notifications,
                Arc::new(SystemClock),
            );

            let outcome = match command {
                Command::Pending { user_id } => engine.pending_approvals(user_id).await.map(|inbox| {
                    if inbox.is_empty() {
                        println!("Nothing waiting for user #{user_id}");
                    }
                    for item in inbox {
                        println!(
                            "idea #{:<6} stage {:<3} workflow #{:<4} {}{}",
                            item.idea_id,
                            item.stage,
                            item.workflow_id,
                            item.title,
                            if item.via_acting { " (acting)" } else { "" }
                        );
                    }
                }),
                Command::Submit { idea_id, user_id } => engine.submit(idea_id, Actor::user(user_id)).await.map(|idea| {
                    println!(
                        "idea #{} submitted: stage {} of {} in workflow #{}",
                        idea.id,
                        idea.current_stage,
                        idea.max_stage,
                        idea.workflow_id.unwrap_or_default()
                    );
                }),
                _ => Ok(()),
            };

            // Flush queued notifications before exiting.
            drop(engine);
            handle.join().await;

            if let Err(e) = outcome {
                eprintln!("{e}");
                pool.close().await;
                std::process::exit(1);
            }
        }
    }

    pool.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_args() {
        assert!(matches!(parse_args(&args(&[])), Some(Command::Migrate)));
        assert!(matches!(parse_args(&args(&["workflows"])), Some(Command::Workflows)));
        assert!(matches!(
            parse_args(&args(&["pending", "12"])),
            Some(Command::Pending { user_id: 12 })
        ));
        assert!(matches!(
            parse_args(&args(&["submit", "7", "2"])),
            Some(Command::Submit { idea_id: 7, user_id: 2 })
        ));
        assert!(parse_args(&args(&["pending"])).is_none());
        assert!(parse_args(&args(&["submit", "7", "x"])).is_none());
        assert!(parse_args(&args(&["approve"])).is_none());
    }
}
