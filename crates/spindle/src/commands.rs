use bitcoin::consensus::encode::deserialize_hex;
use bitcoin::{Network, Transaction, Txid};
use eyre::{eyre, WrapErr};
use serde::Deserialize;
use serde_json::{json, Value};
use spindle_core::trust::{self, TrustStore};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::client::Client;
use crate::scripthash;

/// Protocol range this client speaks, sent with `server.version`.
const PROTOCOL_VERSION: &str = "1.1";

pub async fn version(client: &Client) -> eyre::Result<()> {
    let banner = client
        .call(
            "server.version",
            vec![json!(PROTOCOL_VERSION), json!(PROTOCOL_VERSION)],
        )
        .await?;
    let (software, protocol) = match &banner {
        Value::Array(parts) if parts.len() == 2 => (
            parts[0].as_str().unwrap_or("?"),
            parts[1].as_str().unwrap_or("?"),
        ),
        _ => return Err(eyre!("unexpected server.version reply: {banner}")),
    };
    println!("{}: {software} (protocol {protocol})", client.server());
    Ok(())
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    tx_hash: Txid,
    height: i64,
}

pub async fn history(client: &Client, address: &str, network: Network) -> eyre::Result<()> {
    let script_hash = scripthash::for_address(address, network)?;
    tracing::info!(address, script_hash = %script_hash, "fetching history");

    let raw = client
        .call("blockchain.scripthash.get_history", vec![json!(script_hash)])
        .await?;
    let entries: Vec<HistoryEntry> =
        serde_json::from_value(raw).context("decode get_history reply")?;
    if entries.is_empty() {
        println!("{address}: no transactions");
        return Ok(());
    }

    for entry in &entries {
        let raw_tx = client
            .call(
                "blockchain.transaction.get",
                vec![json!(entry.tx_hash.to_string())],
            )
            .await?;
        let hex = raw_tx
            .as_str()
            .ok_or_else(|| eyre!("transaction {} is not hex: {raw_tx}", entry.tx_hash))?;
        let tx: Transaction = deserialize_hex(hex)
            .map_err(|err| eyre!("decode transaction {}: {err}", entry.tx_hash))?;
        if tx.compute_txid() != entry.tx_hash {
            return Err(eyre!(
                "server returned {} when asked for {}",
                tx.compute_txid(),
                entry.tx_hash
            ));
        }

        let total_out: u64 = tx.output.iter().map(|out| out.value.to_sat()).sum();
        println!(
            "{}  {}  inputs={} outputs={} value={total_out} sat",
            entry.tx_hash,
            describe_height(entry.height),
            tx.input.len(),
            tx.output.len(),
        );
    }
    Ok(())
}

/// Electrum reports mempool transactions with height 0, or -1 when a
/// parent is unconfirmed too.
fn describe_height(height: i64) -> String {
    match height {
        h if h > 0 => format!("height={h}"),
        0 => "mempool".to_owned(),
        _ => "mempool (unconfirmed parent)".to_owned(),
    }
}

pub async fn certs(store: &TrustStore) -> eyre::Result<()> {
    let pins = store
        .list_pins()
        .await
        .wrap_err_with(|| format!("list pins in {}", store.certs_dir().display()))?;
    if pins.is_empty() {
        println!("no pinned certificates in {}", store.certs_dir().display());
        return Ok(());
    }

    for pin in &pins {
        let report = trust::inspect(pin)?;
        println!(
            "{}\n  subject:  {}\n  expires:  {}{}\n  matches:  {}",
            report.host,
            report.subject,
            format_expiry(report.not_after)?,
            if report.expired { " (EXPIRED)" } else { "" },
            if report.covers_host { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn format_expiry(unix: i64) -> eyre::Result<String> {
    let at = OffsetDateTime::from_unix_timestamp(unix).context("certificate expiry out of range")?;
    Ok(at.format(&Rfc3339)?)
}
