use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::ArgMatches;
use tracing::info;

use crate::display::entries_table;
use crate::jobs::{schedule_syncs, Job, JobQueue};
use crate::sync::SyncWindow;
use crate::App;

fn parse_date(value: Option<&str>) -> Result<Option<NaiveDate>> {
    Ok(value
        .map(|v| NaiveDate::parse_from_str(v, "%Y-%m-%d"))
        .transpose()?)
}

fn window(matches: &ArgMatches) -> Result<SyncWindow> {
    let window = SyncWindow {
        start: parse_date(matches.value_of("begin"))?,
        end: parse_date(matches.value_of("until"))?,
    };

    if let (Some(start), Some(end)) = (window.start, window.end) {
        if start > end {
            bail!("--begin {} is after --until {}", start, end);
        }
    }

    Ok(window)
}

#[tracing::instrument(skip(matches, app))]
pub(crate) async fn sync(matches: &ArgMatches, app: &App) -> Result<()> {
    let window = window(matches)?;
    let bank = app.bank()?;

    let scheduled = match matches.value_of("connection_id") {
        Some(id) => {
            // fail early on typos rather than in the worker
            app.store.connections().by_id(id).await?;
            app.queue.enqueue(Job::Sync {
                connection_id: id.to_string(),
                window,
            })?;
            1
        }
        None => schedule_syncs(&app.store, Some(bank), &app.queue, window).await?,
    };

    info!(scheduled, "running syncs");
    app.finish().await?;
    println!("Synced {} connection(s).", scheduled);

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, app: &App) -> Result<()> {
    let accounts = match matches.value_of("account_id") {
        Some(id) => vec![app.store.ledger().account(id).await?],
        None => app.store.ledger().accounts(&app.settings.tenant).await?,
    };

    for account in accounts {
        let entries = app.store.ledger().entries(&account.id).await?;
        println!("{} ({})", account.name, account.id);
        println!("{}", entries_table(&entries)?);
    }

    Ok(())
}
