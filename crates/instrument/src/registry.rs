//! Instrument registry.
//!
//! Loads the broker instrument master once and serves every lookup the rest
//! of the core needs: by root symbol, by symbol + expiry, by underlying +
//! expiry, by security id, plus the per-expiry strike tables the ATM engine
//! walks. Read-only after construction.

use crate::error::{InstrumentError, InstrumentResult};
use crate::types::{InstrumentRecord, LoadReport, StrikeLegs};
use chrono::NaiveDate;
use common::{ExchangeSegment, InstrumentType, OptionRight, SecurityId};
use ordered_float::OrderedFloat;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

type StrikeTable = BTreeMap<OrderedFloat<f64>, StrikeLegs>;

/// Number of malformed rows logged individually before only counting.
const MAX_LOGGED_ROW_ERRORS: usize = 10;

/// One CSV row as the broker publishes it.
#[derive(Debug, Deserialize)]
struct MasterRow {
    security_id: String,
    exchange_segment: String,
    instrument_type: String,
    symbol: String,
    #[serde(default)]
    trading_symbol: Option<String>,
    #[serde(default)]
    underlying: Option<String>,
    #[serde(default)]
    expiry: Option<String>,
    #[serde(default)]
    strike: Option<String>,
    #[serde(default)]
    option_type: Option<String>,
    #[serde(default)]
    lot_size: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl TryFrom<MasterRow> for InstrumentRecord {
    type Error = String;

    fn try_from(row: MasterRow) -> Result<Self, Self::Error> {
        let security_id: SecurityId = row.security_id.parse().map_err(|e| format!("{}", e))?;
        let segment: ExchangeSegment = row
            .exchange_segment
            .parse()
            .map_err(|e| format!("{}", e))?;
        let instrument_type: InstrumentType = row
            .instrument_type
            .parse()
            .map_err(|e| format!("{}", e))?;

        let symbol = row.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err("empty symbol".to_string());
        }
        let underlying = non_empty(&row.underlying)
            .map(str::to_uppercase)
            .unwrap_or_else(|| symbol.clone());

        let expiry = non_empty(&row.expiry)
            .map(|raw| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .map_err(|_| format!("bad expiry '{}'", raw))
            })
            .transpose()?;

        let strike = non_empty(&row.strike)
            .map(|raw| {
                raw.parse::<f64>()
                    .ok()
                    .filter(|s| s.is_finite() && *s > 0.0)
                    .ok_or_else(|| format!("bad strike '{}'", raw))
            })
            .transpose()?;

        let option_right = non_empty(&row.option_type)
            .map(|raw| raw.parse::<OptionRight>().map_err(|e| format!("{}", e)))
            .transpose()?;

        if instrument_type.is_option() != option_right.is_some() {
            return Err(format!(
                "instrument type {} does not match option type {:?}",
                instrument_type, row.option_type
            ));
        }
        if option_right.is_some() && (expiry.is_none() || strike.is_none()) {
            return Err("option contract without expiry or strike".to_string());
        }

        let lot_size = match non_empty(&row.lot_size) {
            Some(raw) => raw
                .parse::<f64>()
                .ok()
                .filter(|l| l.is_finite() && *l >= 1.0)
                .map(|l| l as u32)
                .ok_or_else(|| format!("bad lot size '{}'", raw))?,
            None => 1,
        };

        let trading_symbol = non_empty(&row.trading_symbol)
            .map(str::to_string)
            .unwrap_or_else(|| symbol.clone());

        Ok(InstrumentRecord {
            security_id,
            segment,
            instrument_type,
            symbol,
            trading_symbol,
            underlying,
            expiry,
            strike,
            option_right,
            lot_size,
        })
    }
}

/// Indexed, read-only view of the instrument universe.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    by_symbol: HashMap<String, Vec<Arc<InstrumentRecord>>>,
    by_symbol_expiry: HashMap<(String, NaiveDate), Vec<Arc<InstrumentRecord>>>,
    by_underlying_expiry: HashMap<(String, NaiveDate), Vec<Arc<InstrumentRecord>>>,
    by_security_id: HashMap<SecurityId, Arc<InstrumentRecord>>,
    strikes: HashMap<(String, NaiveDate), StrikeTable>,
    strike_steps: HashMap<String, f64>,
    lot_sizes: HashMap<String, u32>,
    option_segments: HashMap<String, ExchangeSegment>,
    spot: HashMap<String, Arc<InstrumentRecord>>,
    report: LoadReport,
}

impl InstrumentRegistry {
    /// Load the instrument master CSV from a file.
    pub fn load_path<P: AsRef<Path>>(path: P) -> InstrumentResult<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            InstrumentError::Source(format!("{}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), "Loading instrument master");
        Self::load(file)
    }

    /// Parse the instrument master once and build every index.
    ///
    /// Malformed rows are skipped and counted in [`LoadReport::skipped`];
    /// only an unreadable source (missing header, I/O failure) is an error.
    #[instrument(skip(source))]
    pub fn load<R: Read>(source: R) -> InstrumentResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(source);

        let headers = reader.headers()?.clone();
        if !headers.iter().any(|h| h == "security_id") {
            return Err(InstrumentError::Source(
                "instrument master has no security_id column".to_string(),
            ));
        }

        let mut registry = Self::default();

        for (index, row) in reader.deserialize::<MasterRow>().enumerate() {
            // Header is line 1
            let line = index + 2;
            let parsed = row
                .map_err(|e| e.to_string())
                .and_then(InstrumentRecord::try_from)
                .and_then(|record| registry.insert(record));

            match parsed {
                Ok(()) => registry.report.loaded += 1,
                Err(reason) => {
                    registry.report.skipped += 1;
                    if registry.report.skipped <= MAX_LOGGED_ROW_ERRORS {
                        let err = InstrumentError::MalformedRow { row: line, reason };
                        warn!(%err, "Skipping instrument row");
                    }
                }
            }
        }

        if registry.report.skipped > 0 {
            warn!(
                skipped = registry.report.skipped,
                "Instrument master contained malformed rows"
            );
        }

        registry.finish();

        info!(
            loaded = registry.report.loaded,
            skipped = registry.report.skipped,
            underlyings = registry.strike_steps.len(),
            "Instrument registry ready"
        );
        Ok(registry)
    }

    fn insert(&mut self, record: InstrumentRecord) -> Result<(), String> {
        if self.by_security_id.contains_key(&record.security_id) {
            return Err(format!("duplicate security id {}", record.security_id));
        }

        let record = Arc::new(record);
        self.by_security_id
            .insert(record.security_id, Arc::clone(&record));
        self.by_symbol
            .entry(record.symbol.clone())
            .or_default()
            .push(Arc::clone(&record));

        if let Some(expiry) = record.expiry {
            self.by_symbol_expiry
                .entry((record.symbol.clone(), expiry))
                .or_default()
                .push(Arc::clone(&record));
            self.by_underlying_expiry
                .entry((record.underlying.clone(), expiry))
                .or_default()
                .push(Arc::clone(&record));
        }

        if let (Some(expiry), Some(strike), Some(right)) =
            (record.expiry, record.strike, record.option_right)
        {
            self.strikes
                .entry((record.underlying.clone(), expiry))
                .or_default()
                .entry(OrderedFloat(strike))
                .or_default()
                .set(right, record.security_id);
            self.lot_sizes
                .entry(record.underlying.clone())
                .or_insert(record.lot_size);
            self.option_segments
                .entry(record.underlying.clone())
                .or_insert(record.segment);
        }

        if record.is_spot() && record.symbol == record.underlying {
            self.spot
                .entry(record.underlying.clone())
                .or_insert_with(|| Arc::clone(&record));
        }

        Ok(())
    }

    /// Derive strike steps and sort the per-expiry chains.
    fn finish(&mut self) {
        for ((underlying, _), table) in &self.strikes {
            let Some(gap) = min_positive_gap(table.keys().map(|k| k.0)) else {
                continue;
            };
            self.strike_steps
                .entry(underlying.clone())
                .and_modify(|step| *step = step.min(gap))
                .or_insert(gap);
        }

        for records in self.by_underlying_expiry.values_mut() {
            records.sort_by(|a, b| {
                OrderedFloat(a.strike.unwrap_or_default())
                    .cmp(&OrderedFloat(b.strike.unwrap_or_default()))
                    .then(a.option_right.cmp(&b.option_right))
            });
        }

        debug!(steps = ?self.strike_steps, "Derived strike steps");
    }

    pub fn load_report(&self) -> LoadReport {
        self.report
    }

    pub fn len(&self) -> usize {
        self.by_security_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_security_id.is_empty()
    }

    /// Every record with this root symbol (spot, futures and options).
    pub fn lookup(&self, symbol: &str) -> Vec<Arc<InstrumentRecord>> {
        self.by_symbol
            .get(&symbol.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    /// Contracts of a root symbol expiring on `expiry`.
    pub fn lookup_expiry(&self, symbol: &str, expiry: NaiveDate) -> Vec<Arc<InstrumentRecord>> {
        self.by_symbol_expiry
            .get(&(symbol.to_uppercase(), expiry))
            .cloned()
            .unwrap_or_default()
    }

    /// Option contracts on `underlying` for `expiry`, ordered by strike then right.
    pub fn chain(&self, underlying: &str, expiry: NaiveDate) -> Vec<Arc<InstrumentRecord>> {
        self.by_underlying_expiry
            .get(&(underlying.to_uppercase(), expiry))
            .map(|records| records.iter().filter(|r| r.is_option()).cloned().collect())
            .unwrap_or_default()
    }

    pub fn by_security_id(&self, id: SecurityId) -> Option<Arc<InstrumentRecord>> {
        self.by_security_id.get(&id).cloned()
    }

    /// The spot (index or cash) record of an underlying.
    pub fn spot(&self, underlying: &str) -> Option<Arc<InstrumentRecord>> {
        self.spot.get(&underlying.to_uppercase()).cloned()
    }

    /// Minimum positive gap between listed strikes, or `None` when fewer
    /// than two distinct strikes are listed for any expiry.
    pub fn strike_step(&self, underlying: &str) -> Option<f64> {
        self.strike_steps.get(&underlying.to_uppercase()).copied()
    }

    /// Sorted distinct expiries of `underlying`. With `instrument_type`
    /// set, only expiries where that type is listed.
    pub fn expiries(
        &self,
        underlying: &str,
        instrument_type: Option<InstrumentType>,
    ) -> Vec<NaiveDate> {
        let underlying = underlying.to_uppercase();
        let expiries: BTreeSet<NaiveDate> = self
            .by_underlying_expiry
            .iter()
            .filter(|((u, _), _)| *u == underlying)
            .filter(|(_, records)| match instrument_type {
                Some(wanted) => records.iter().any(|r| r.instrument_type == wanted),
                None => true,
            })
            .map(|((_, expiry), _)| *expiry)
            .collect();
        expiries.into_iter().collect()
    }

    /// First expiry on or after `today` that lists options.
    pub fn nearest_option_expiry(&self, underlying: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.option_expiries(underlying)
            .into_iter()
            .find(|e| *e >= today)
    }

    /// Sorted expiries with at least one listed option contract.
    pub fn option_expiries(&self, underlying: &str) -> Vec<NaiveDate> {
        let underlying = underlying.to_uppercase();
        let expiries: BTreeSet<NaiveDate> = self
            .strikes
            .keys()
            .filter(|(u, _)| *u == underlying)
            .map(|(_, e)| *e)
            .collect();
        expiries.into_iter().collect()
    }

    pub fn lot_size(&self, underlying: &str) -> Option<u32> {
        self.lot_sizes.get(&underlying.to_uppercase()).copied()
    }

    /// Segment the underlying's option contracts trade on, falling back to
    /// the spot record's segment.
    pub fn segment_of(&self, underlying: &str) -> Option<ExchangeSegment> {
        let key = underlying.to_uppercase();
        self.option_segments
            .get(&key)
            .copied()
            .or_else(|| self.spot.get(&key).map(|r| r.segment))
    }

    /// Index underlyings get wider chains.
    pub fn is_index(&self, underlying: &str) -> bool {
        let key = underlying.to_uppercase();
        if let Some(spot) = self.spot.get(&key) {
            return spot.instrument_type == InstrumentType::Index;
        }
        self.by_symbol
            .get(&key)
            .map(|records| records.iter().any(|r| r.instrument_type.is_index_linked()))
            .unwrap_or(false)
    }

    pub fn option_token(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        strike: f64,
        right: OptionRight,
    ) -> Option<SecurityId> {
        self.strikes
            .get(&(underlying.to_uppercase(), expiry))
            .and_then(|table| table.get(&OrderedFloat(strike)))
            .and_then(|legs| legs.get(right))
    }

    /// Listed strikes with both legs, ascending.
    pub fn strikes(&self, underlying: &str, expiry: NaiveDate) -> Vec<(f64, StrikeLegs)> {
        self.strikes
            .get(&(underlying.to_uppercase(), expiry))
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, legs)| legs.is_complete())
                    .map(|(strike, legs)| (strike.0, *legs))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Underlyings with at least one listed option.
    pub fn option_underlyings(&self) -> Vec<String> {
        let set: BTreeSet<&String> = self.strikes.keys().map(|(u, _)| u).collect();
        set.into_iter().cloned().collect()
    }
}

fn min_positive_gap(sorted: impl Iterator<Item = f64>) -> Option<f64> {
    let mut prev: Option<f64> = None;
    let mut best: Option<f64> = None;
    for strike in sorted {
        if let Some(p) = prev {
            // Round away float noise from decimal strikes
            let gap = ((strike - p) * 10_000.0).round() / 10_000.0;
            if gap > 0.0 {
                best = Some(best.map_or(gap, |b: f64| b.min(gap)));
            }
        }
        prev = Some(strike);
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{nifty_expiry, sample_master_csv, sample_registry, NIFTY_SPOT_ID};

    #[test]
    fn test_loads_sample_master() {
        let registry = sample_registry();
        let report = registry.load_report();
        assert_eq!(report.skipped, 0);
        assert!(report.loaded > 100);
        assert_eq!(registry.len(), report.loaded);
    }

    #[test]
    fn test_lookup_by_symbol_and_id() {
        let registry = sample_registry();
        let nifty = registry.lookup("nifty");
        assert!(nifty.iter().any(|r| r.security_id == NIFTY_SPOT_ID));
        assert!(registry.lookup("UNKNOWN").is_empty());

        let spot = registry.by_security_id(NIFTY_SPOT_ID).unwrap();
        assert_eq!(spot.segment, ExchangeSegment::Index);
        assert!(registry.by_security_id(SecurityId(999_999)).is_none());
    }

    #[test]
    fn test_chain_is_sorted_options_only() {
        let registry = sample_registry();
        let chain = registry.chain("NIFTY", nifty_expiry());
        assert!(!chain.is_empty());
        assert!(chain.iter().all(|r| r.is_option()));
        let strikes: Vec<f64> = chain.iter().filter_map(|r| r.strike).collect();
        let mut sorted = strikes.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(strikes, sorted);

        let missing = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        assert!(registry.chain("NIFTY", missing).is_empty());
    }

    #[test]
    fn test_strike_step_is_min_gap() {
        let registry = sample_registry();
        assert_eq!(registry.strike_step("NIFTY"), Some(100.0));
        assert_eq!(registry.strike_step("RELIANCE"), Some(20.0));
        assert_eq!(registry.strike_step("UNKNOWN"), None);
    }

    #[test]
    fn test_strike_step_sentinel_with_single_strike() {
        let csv = "security_id,exchange_segment,instrument_type,symbol,underlying,expiry,strike,option_type,lot_size\n\
                   1,NSE_FNO,OPTSTK,TINY,TINY,2024-03-28,100,CE,10\n\
                   2,NSE_FNO,OPTSTK,TINY,TINY,2024-03-28,100,PE,10\n";
        let registry = InstrumentRegistry::load(csv.as_bytes()).unwrap();
        assert_eq!(registry.strike_step("TINY"), None);
        assert_eq!(registry.strikes("TINY", nifty_expiry()).len(), 1);
    }

    #[test]
    fn test_uneven_strikes_use_smallest_gap() {
        let csv = "security_id,exchange_segment,instrument_type,symbol,underlying,expiry,strike,option_type,lot_size\n\
                   1,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,100,CE,10\n\
                   2,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,110,CE,10\n\
                   3,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,112.5,CE,10\n\
                   4,NSE_FNO,OPTSTK,ABC,ABC,2024-04-25,100,CE,10\n\
                   5,NSE_FNO,OPTSTK,ABC,ABC,2024-04-25,200,CE,10\n";
        let registry = InstrumentRegistry::load(csv.as_bytes()).unwrap();
        assert_eq!(registry.strike_step("ABC"), Some(2.5));
    }

    #[test]
    fn test_malformed_rows_are_skipped_and_counted() {
        let csv = "security_id,exchange_segment,instrument_type,symbol,underlying,expiry,strike,option_type,lot_size\n\
                   1,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,100,CE,10\n\
                   x,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,100,PE,10\n\
                   3,NYSE,OPTSTK,ABC,ABC,2024-03-28,100,PE,10\n\
                   4,NSE_FNO,OPTSTK,ABC,ABC,,100,PE,10\n\
                   5,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,-5,PE,10\n\
                   1,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,120,PE,10\n\
                   6,NSE_FNO\n\
                   7,NSE_FNO,OPTSTK,ABC,ABC,2024-03-28,100,PE,10\n";
        let registry = InstrumentRegistry::load(csv.as_bytes()).unwrap();
        let report = registry.load_report();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 6);
    }

    #[test]
    fn test_missing_header_is_source_error() {
        let result = InstrumentRegistry::load("foo,bar\n1,2\n".as_bytes());
        assert!(matches!(result, Err(InstrumentError::Source(_))));
    }

    #[test]
    fn test_expiries_sorted_and_distinct() {
        let registry = sample_registry();
        let expiries = registry.expiries("NIFTY", Some(InstrumentType::Optidx));
        assert_eq!(expiries.len(), 2);
        assert!(expiries[0] < expiries[1]);
        assert_eq!(registry.option_expiries("NIFTY"), expiries);
        assert!(registry.expiries("NIFTY", Some(InstrumentType::Optstk)).is_empty());
    }

    #[test]
    fn test_nearest_expiry_skips_past() {
        let registry = sample_registry();
        let expiries = registry.option_expiries("NIFTY");
        let after_first = expiries[0].succ_opt().unwrap();
        assert_eq!(
            registry.nearest_option_expiry("NIFTY", after_first),
            Some(expiries[1])
        );
    }

    #[test]
    fn test_underlying_metadata() {
        let registry = sample_registry();
        assert_eq!(registry.lot_size("NIFTY"), Some(50));
        assert_eq!(registry.segment_of("NIFTY"), Some(ExchangeSegment::NseFno));
        assert!(registry.is_index("NIFTY"));
        assert!(!registry.is_index("RELIANCE"));
        assert_eq!(
            registry.spot("RELIANCE").map(|r| r.segment),
            Some(ExchangeSegment::NseEquity)
        );
        assert!(registry
            .option_token("NIFTY", nifty_expiry(), 23200.0, OptionRight::Call)
            .is_some());
        assert!(registry
            .option_token("NIFTY", nifty_expiry(), 23250.0, OptionRight::Call)
            .is_none());
    }

    #[test]
    fn test_load_path_missing_file() {
        let result = InstrumentRegistry::load_path("/nonexistent/master.csv");
        assert!(matches!(result, Err(InstrumentError::Source(_))));
        // fixture text is valid CSV on its own
        assert!(InstrumentRegistry::load(sample_master_csv().as_bytes()).is_ok());
    }
}
