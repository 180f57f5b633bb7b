mod accounts;
mod core;
mod display;
mod jobs;
mod link;
mod monitor;
mod settings;
mod store;
mod sync;
mod txn;
mod upstream;

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use clap::{arg, ArgMatches, Command};
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

use crate::jobs::{LocalQueue, Worker};
use crate::link::LinkController;
use crate::monitor::TracingReporter;
use crate::settings::Settings;
use crate::store::SqliteStore;
use crate::upstream::BankData;

static CLIENT_NAME: &str = "banklink";

/// Everything a command needs, built once from the settings.
pub(crate) struct App {
    pub(crate) settings: Settings,
    pub(crate) store: SqliteStore,
    pub(crate) bank: Option<gocardless::Client>,
    pub(crate) queue: LocalQueue,
    pub(crate) reporter: TracingReporter,
}

impl App {
    async fn new(settings: Settings) -> Result<Self> {
        if !settings.db_file.contains(":memory:") {
            if let Some(dir) = Path::new(&settings.db_file).parent() {
                std::fs::create_dir_all(dir)?;
            }
        }

        let store = SqliteStore::new(&settings.db_url()).await?;
        let bank = settings.provider()?;

        Ok(Self {
            settings,
            store,
            bank,
            queue: LocalQueue::new(),
            reporter: TracingReporter,
        })
    }

    pub(crate) fn bank(&self) -> Result<&dyn BankData> {
        match &self.bank {
            Some(client) => Ok(client),
            None => Err(anyhow!(
                "GoCardless is not configured, add a [gocardless] table to {} or set BANKLINK_GOCARDLESS__SECRET_ID and BANKLINK_GOCARDLESS__SECRET_KEY",
                settings::default_config_path()
            )),
        }
    }

    pub(crate) fn links(&self) -> Result<LinkController<'_>> {
        Ok(LinkController::new(
            &self.store,
            self.bank()?,
            &self.queue,
            &self.settings.tenant,
            &self.settings.redirect_url,
        ))
    }

    /// Runs whatever the command queued before the process exits.
    pub(crate) async fn finish(&self) -> Result<()> {
        let bank = match &self.bank {
            Some(client) => client,
            None => return Ok(()),
        };

        let report = Worker::new(&self.store, bank, &self.queue, &self.reporter)
            .run_until_idle()
            .await;
        if report.failed > 0 {
            bail!(
                "{} of {} background jobs failed, rerun with --verbose for details",
                report.failed,
                report.failed + report.completed
            );
        }

        Ok(())
    }
}

pub(crate) fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .value_of(name)
        .ok_or_else(|| anyhow!("missing required argument <{}>", name))
}

fn cli() -> Command<'static> {
    Command::new(CLIENT_NAME)
        .about("The banklink utility links bank accounts through GoCardless Bank Account \
         Data and keeps a local ledger of their balances and transactions in sync.")
        .version("0.1.0")
        .subcommand_required(true)
        .allow_external_subcommands(false)
        .arg(arg!(CONFIG: -c --config [FILE] "Sets a custom config file"))
        .arg(arg!(verbose: -v --verbose "Logs what the engine is doing to stderr"))
        .subcommand(Command::new("institutions")
            .about("Lists the banks available in a country.")
            .arg(arg!(country: --country <CC> "Two letter country code, e.g. GB.")))
        .subcommand(Command::new("link")
            .subcommand_required(true)
            .about("Manages bank connections.")
            .subcommand(Command::new("start")
                .about("Starts a bank consent and prints the link to grant access.")
                .arg(arg!(institution: --institution <ID> "The institution to link, see `institutions`.")))
            .subcommand(Command::new("complete")
                .about("Records a connection once the consent was granted and syncs it.")
                .arg(arg!(requisition_id: <REQUISITION_ID> "The requisition printed by `link start`."))
                .arg(arg!(institution: --institution [ID] "Institution ID, when the requisition does not carry one."))
                .arg(arg!(name: --name [NAME] "Display name, defaults to the institution's name.")))
            .subcommand(Command::new("reconnect")
                .about("Renews the consent of an existing connection.")
                .arg(arg!(connection_id: <CONNECTION_ID> "The connection to renew."))
                .arg(arg!(requisition: --requisition [REQUISITION_ID] "Completes a reconnect started earlier.")))
            .subcommand(Command::new("status").about("Displays all connections and their current status."))
            .subcommand(Command::new("delete")
                .about("Revokes a connection and deletes its data.")
                .arg(arg!(connection_id: <CONNECTION_ID> "The connection to delete."))))
        .subcommand(Command::new("sync")
            .about("Pulls fresh data for one connection, or all of them.")
            .arg(arg!(connection_id: [CONNECTION_ID] "Only sync this connection."))
            .arg(arg!(begin: --begin [DATE] "The first day of transactions to pull. Start date is inclusive."))
            .arg(arg!(until: --until [DATE] "The last day of transactions to pull. End date is inclusive.")))
        .subcommand(Command::new("accounts")
            .about("Prints ledger accounts to stdout.")
            .subcommand(Command::new("rename")
                .about("Renames an account. Syncs will keep the new name.")
                .arg(arg!(account_id: <ACCOUNT_ID> "The account to rename."))
                .arg(arg!(name: <NAME> "The new name."))))
        .subcommand(Command::new("transactions")
            .about("Prints synced ledger entries.")
            .arg(arg!(account_id: [ACCOUNT_ID] "Only print entries of this account.")))
}

async fn run() -> Result<()> {
    let matches = cli().get_matches();

    if matches.is_present("verbose") {
        tracing_subscriber::registry()
            .with(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    let settings = Settings::new(matches.value_of("CONFIG"))?;
    let app = App::new(settings).await?;

    match matches.subcommand() {
        Some(("institutions", sub_matches)) => link::institutions(sub_matches, &app).await,
        Some(("link", sub_matches)) => link::run(sub_matches, &app).await,
        Some(("sync", sub_matches)) => txn::sync(sub_matches, &app).await,
        Some(("accounts", sub_matches)) => accounts::run(sub_matches, &app).await,
        Some(("transactions", sub_matches)) => txn::run(sub_matches, &app).await,
        _ => Err(anyhow!("unknown command")),
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
