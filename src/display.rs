use std::io::Write;

use anyhow::Result;
use chrono::{DateTime, Utc};
use gocardless::model::Institution;
use tabwriter::TabWriter;

use crate::core::{Connection, LedgerAccount, LedgerEntry};

fn render(tw: TabWriter<Vec<u8>>) -> Result<String> {
    Ok(String::from_utf8(tw.into_inner()?)?)
}

pub fn institutions_table(institutions: &[Institution]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Institution ID\tName\tBIC")?;

    for ins in institutions {
        writeln!(
            tw,
            "{}\t{}\t{}",
            ins.id,
            ins.name.as_deref().unwrap_or("-"),
            ins.bic.as_deref().unwrap_or("-"),
        )?;
    }

    render(tw)
}

pub fn connections_table(conns: &[Connection], now: DateTime<Utc>) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Connection ID\tName\tInstitution\tStatus\tAccess Until")?;

    for conn in conns {
        let status = if conn.scheduled_for_deletion {
            "deleting".to_string()
        } else if conn.status.needs_reauth() || conn.is_access_expired(now) {
            format!("{} (reconnect)", conn.status)
        } else if conn.is_access_expiring_soon(now) {
            format!("{} (expiring soon)", conn.status)
        } else {
            conn.status.to_string()
        };

        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}",
            conn.id,
            conn.name,
            conn.institution_id,
            status,
            conn.access_valid_until
                .map_or_else(|| "-".to_string(), |until| until.format("%Y-%m-%d").to_string()),
        )?;
    }

    render(tw)
}

pub fn accounts_table(accounts: &[LedgerAccount]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);
    writeln!(tw, "Account ID\tName\tType\tSubtype\tBalance")?;

    for account in accounts {
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{} {}",
            account.id,
            account.name,
            account.accountable,
            account.subtype.as_deref().unwrap_or("-"),
            account.balance,
            account.currency,
        )?;
    }

    render(tw)
}

pub fn entries_table(entries: &[LedgerEntry]) -> Result<String> {
    let mut tw = TabWriter::new(vec![]);

    for entry in entries {
        writeln!(tw, "{}\t{}\t{} {}", entry.date, entry.name, entry.amount, entry.currency)?;
        writeln!(tw, "\t; ID: {}", entry.dedup_key)?;
    }

    render(tw)
}
