//! Instrument master fixture shared by the test suites of dependent crates.

use crate::registry::InstrumentRegistry;
use chrono::NaiveDate;
use common::SecurityId;
use std::fmt::Write;
use std::sync::Arc;

pub const NIFTY_SPOT_ID: SecurityId = SecurityId(13);
pub const BANKNIFTY_SPOT_ID: SecurityId = SecurityId(25);
pub const RELIANCE_SPOT_ID: SecurityId = SecurityId(2885);
pub const NIFTY_FUTURE_ID: SecurityId = SecurityId(35000);

pub fn nifty_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 28).expect("valid date")
}

pub fn nifty_next_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, 25).expect("valid date")
}

pub fn banknifty_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 27).expect("valid date")
}

pub fn reliance_expiry() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 28).expect("valid date")
}

#[allow(clippy::too_many_arguments)]
fn push_options(
    out: &mut String,
    first_id: u64,
    kind: &str,
    symbol: &str,
    expiry: NaiveDate,
    strikes: impl Iterator<Item = u64>,
    lot: u32,
) {
    let mut id = first_id;
    for strike in strikes {
        for right in ["CE", "PE"] {
            let _ = writeln!(
                out,
                "{id},NSE_FNO,{kind},{symbol},{symbol}-{exp}-{strike}-{right},{symbol},{expiry},{strike},{right},{lot}",
                exp = expiry.format("%b%Y"),
                expiry = expiry.format("%Y-%m-%d"),
            );
            id += 1;
        }
    }
}

/// CSV text: NIFTY (two expiries, step 100), BANKNIFTY (step 100) and
/// RELIANCE (step 20), each with its spot record.
pub fn sample_master_csv() -> String {
    let mut out = String::from(
        "security_id,exchange_segment,instrument_type,symbol,trading_symbol,underlying,expiry,strike,option_type,lot_size\n",
    );
    out.push_str("13,IDX_I,INDEX,NIFTY,NIFTY 50,NIFTY,,,,1\n");
    out.push_str("25,IDX_I,INDEX,BANKNIFTY,NIFTY BANK,BANKNIFTY,,,,1\n");
    out.push_str("2885,NSE_EQ,EQUITY,RELIANCE,RELIANCE,RELIANCE,,,,1\n");
    out.push_str("35000,NSE_FNO,FUTIDX,NIFTY,NIFTY-Mar2024-FUT,NIFTY,2024-03-28,,,50\n");

    push_options(
        &mut out,
        40_000,
        "OPTIDX",
        "NIFTY",
        nifty_expiry(),
        (22_000..=24_000).step_by(100),
        50,
    );
    push_options(
        &mut out,
        41_000,
        "OPTIDX",
        "NIFTY",
        nifty_next_expiry(),
        (22_000..=24_000).step_by(100),
        50,
    );
    push_options(
        &mut out,
        42_000,
        "OPTIDX",
        "BANKNIFTY",
        banknifty_expiry(),
        (47_000..=49_000).step_by(100),
        15,
    );
    push_options(
        &mut out,
        43_000,
        "OPTSTK",
        "RELIANCE",
        reliance_expiry(),
        (2_800..=3_000).step_by(20),
        250,
    );
    out
}

pub fn sample_registry() -> Arc<InstrumentRegistry> {
    Arc::new(
        InstrumentRegistry::load(sample_master_csv().as_bytes())
            .expect("fixture instrument master parses"),
    )
}
