//! Rendering of balance snapshots for the command line.

use alloy_primitives::utils::format_units;
use alloy_primitives::{Address, I256};
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use num_bigint::BigInt;
use serde_json::json;

use crate::cursor::ProcessingCursor;

pub const DEFAULT_DECIMALS: u8 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

/// Human-readable amount in token units. Falls back to the raw integer when
/// the value does not fit a signed 256-bit integer.
pub fn format_amount(amount: &BigInt, decimals: u8) -> String {
    I256::from_dec_str(&amount.to_string())
        .ok()
        .and_then(|value| format_units(value, decimals).ok())
        .unwrap_or_else(|| amount.to_string())
}

/// Ranked holder list, as produced by
/// [`Ledger::top_holders`](crate::ledger::Ledger::top_holders).
pub fn format_holders(holders: &[(Address, BigInt)], decimals: u8, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => format_holders_table(holders, decimals),
        OutputFormat::Json => format_holders_json(holders, decimals),
        OutputFormat::Csv => format_holders_csv(holders, decimals),
    }
}

fn format_holders_table(holders: &[(Address, BigInt)], decimals: u8) -> String {
    if holders.is_empty() {
        return "No holders found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Rank", "Address", "Balance", "Balance (Wei)"]);

    for (i, (address, balance)) in holders.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(address.to_checksum(None)),
            Cell::new(format_amount(balance, decimals)),
            Cell::new(balance.to_string()),
        ]);
    }

    table.to_string()
}

fn format_holders_json(holders: &[(Address, BigInt)], decimals: u8) -> String {
    let json_holders: Vec<_> = holders
        .iter()
        .enumerate()
        .map(|(i, (address, balance))| {
            json!({
                "rank": i + 1,
                "address": address,
                "balance": format_amount(balance, decimals),
                "balance_wei": balance.to_string(),
            })
        })
        .collect();

    serde_json::to_string_pretty(&json_holders).unwrap_or_else(|_| "[]".to_string())
}

fn format_holders_csv(holders: &[(Address, BigInt)], decimals: u8) -> String {
    let mut wtr = Writer::from_writer(vec![]);

    let _ = wtr.write_record(["rank", "address", "balance", "balance_wei"]);

    for (i, (address, balance)) in holders.iter().enumerate() {
        let _ = wtr.write_record([
            &(i + 1).to_string(),
            &address.to_checksum(None),
            &format_amount(balance, decimals),
            &balance.to_string(),
        ]);
    }

    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

/// Indexing progress: cursor, number of holders and net supply.
pub fn format_summary(
    cursor: &ProcessingCursor,
    holders: usize,
    supply: &BigInt,
    decimals: u8,
    format: OutputFormat,
) -> String {
    let block_or_na = |block: Option<u64>| block.map_or("N/A".to_string(), |b| b.to_string());
    let enqueued = block_or_na(cursor.last_block_enqueued);
    let processed = block_or_na(cursor.last_block_processed);
    let in_flight = cursor.in_flight();
    let supply_formatted = format_amount(supply, decimals);

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec!["Metric", "Value"]);

            table.add_row(vec![Cell::new("Last Block Enqueued"), Cell::new(&enqueued)]);
            table.add_row(vec![Cell::new("Last Block Processed"), Cell::new(&processed)]);
            table.add_row(vec![Cell::new("Blocks In Flight"), Cell::new(in_flight)]);
            table.add_row(vec![Cell::new("Holders"), Cell::new(holders)]);
            table.add_row(vec![Cell::new("Net Supply"), Cell::new(&supply_formatted)]);
            table.add_row(vec![Cell::new("Net Supply (Wei)"), Cell::new(supply.to_string())]);

            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(&json!({
            "last_block_enqueued": cursor.last_block_enqueued,
            "last_block_processed": cursor.last_block_processed,
            "blocks_in_flight": in_flight,
            "holders": holders,
            "net_supply": supply_formatted,
            "net_supply_wei": supply.to_string(),
        }))
        .unwrap_or_else(|_| "{}".to_string()),
        OutputFormat::Csv => {
            let mut wtr = Writer::from_writer(vec![]);
            let _ = wtr.write_record(["metric", "value"]);
            let _ = wtr.write_record(["last_block_enqueued", &enqueued]);
            let _ = wtr.write_record(["last_block_processed", &processed]);
            let _ = wtr.write_record(["blocks_in_flight", &in_flight.to_string()]);
            let _ = wtr.write_record(["holders", &holders.to_string()]);
            let _ = wtr.write_record(["net_supply", &supply_formatted]);
            let _ = wtr.write_record(["net_supply_wei", &supply.to_string()]);
            String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
        }
    }
}
