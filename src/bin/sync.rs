//! Launchpad sync CLI.
//!
//! Loads one project's stores from the backing store and prints them as JSON.
//! With `--watch` the change-feed channels stay open and every store change
//! is logged until Ctrl-C.
//!
//! Usage: `launchpad-sync <project-id> [--watch]`
//! Logging: `RUST_LOG=launchpad_lib=debug launchpad-sync p1 --watch`

use anyhow::{bail, Context};
use serde::Serialize;

use launchpad_lib::state::{load_config, AppState};
use launchpad_lib::store::StoreSnapshot;
use launchpad_lib::types::{ActivityEntry, CalendarEvent, Milestone, Task, TeamMember};

const USAGE: &str = "usage: launchpad-sync <project-id> [--watch]";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectSnapshot {
    project_id: String,
    team: StoreSnapshot<TeamMember>,
    tasks: StoreSnapshot<Task>,
    milestones: StoreSnapshot<Milestone>,
    events: StoreSnapshot<CalendarEvent>,
    activity: StoreSnapshot<ActivityEntry>,
}

impl ProjectSnapshot {
    fn take(state: &AppState, project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            team: state.stores.team().snapshot(),
            tasks: state.stores.tasks().snapshot(),
            milestones: state.stores.milestones().snapshot(),
            events: state.stores.events().snapshot(),
            activity: state.stores.activity().snapshot(),
        }
    }
}

struct Args {
    project_id: String,
    watch: bool,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut project_id = None;
    let mut watch = false;

    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-w" | "--watch" => watch = true,
            flag if flag.starts_with('-') => bail!("unknown flag {flag}\n{USAGE}"),
            _ => {
                if project_id.replace(arg).is_some() {
                    bail!("expected one project id\n{USAGE}");
                }
            }
        }
    }

    match project_id {
        Some(project_id) => Ok(Some(Args { project_id, watch })),
        None => bail!(USAGE),
    }
}

fn print_snapshot(state: &AppState, project_id: &str) -> anyhow::Result<()> {
    let snapshot = ProjectSnapshot::take(state, project_id);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn watch_until_interrupted(state: &AppState, project_id: &str) -> anyhow::Result<()> {
    let stores = &state.stores;
    let mut team = stores.team().watch();
    let mut tasks = stores.tasks().watch();
    let mut milestones = stores.milestones().watch();
    let mut events = stores.events().watch();
    let mut activity = stores.activity().watch();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    log::info!("Sync: watching project {} (Ctrl-C to stop)", project_id);

    loop {
        let table = tokio::select! {
            res = &mut ctrl_c => {
                res.context("Failed to listen for Ctrl-C")?;
                break;
            }
            Ok(()) = team.changed() => "team_members",
            Ok(()) = tasks.changed() => "tasks",
            Ok(()) = milestones.changed() => "milestones",
            Ok(()) = events.changed() => "calendar_events",
            Ok(()) = activity.changed() => "activity_log",
        };

        let snapshot = ProjectSnapshot::take(state, project_id);
        log::info!(
            "Sync: {} changed (team {}, tasks {}, milestones {}, events {}, activity {})",
            table,
            snapshot.team.len(),
            snapshot.tasks.len(),
            snapshot.milestones.len(),
            snapshot.events.len(),
            snapshot.activity.len(),
        );
    }

    state.logout();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let Some(args) = parse_args()? else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = load_config().context("Failed to load Launchpad config")?;
    let state = AppState::open(config).context("Failed to open backing store")?;

    state.stores.open_project(&args.project_id).await;
    print_snapshot(&state, &args.project_id)?;

    if args.watch {
        watch_until_interrupted(&state, &args.project_id).await?;
    }
    Ok(())
}
