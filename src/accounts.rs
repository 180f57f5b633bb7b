use anyhow::Result;
use clap::ArgMatches;

use crate::display::accounts_table;
use crate::{required, App};

async fn print(app: &App) -> Result<()> {
    let accounts = app.store.ledger().accounts(&app.settings.tenant).await?;

    println!("{}", accounts_table(&accounts)?);

    Ok(())
}

async fn rename(app: &App, account_id: &str, name: &str) -> Result<()> {
    app.store.ledger().rename_account(account_id, name).await?;

    println!("Renamed {} to {}.", account_id, name);

    Ok(())
}

pub(crate) async fn run(matches: &ArgMatches, app: &App) -> Result<()> {
    match matches.subcommand() {
        Some(("rename", rename_matches)) => {
            rename(
                app,
                required(rename_matches, "account_id")?,
                required(rename_matches, "name")?,
            )
            .await
        }
        _ => print(app).await,
    }
}
