use super::evaluator::{evaluate_path, meets_threshold, resolve_meta};
use super::graph::{CurrencyGraph, PathCandidate};
use super::types::{Opportunity, ScanMethod, ScanStats, ScannerConfig};
use crate::errors::{AppError, Result};
use crate::market::{CacheSnapshot, MarketDataCache};
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::{BTreeSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

pub const OPPORTUNITY_HISTORY_CAPACITY: usize = 1_000;

#[derive(Debug, Default)]
struct ScannerState {
    latest: Vec<Opportunity>,
    history: VecDeque<Opportunity>,
    stats: ScanStats,
}

/// Enumerates cyclic paths over the cached universe and ranks the profitable ones.
pub struct OpportunityScanner {
    cache: Arc<MarketDataCache>,
    config: ScannerConfig,
    state: Mutex<ScannerState>,
}

impl OpportunityScanner {
    pub fn new(cache: Arc<MarketDataCache>, config: ScannerConfig) -> Self {
        Self {
            cache,
            config,
            state: Mutex::new(ScannerState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScannerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    /// Scan with the scanner's own configuration and replace the recorded ranking.
    pub fn scan_paths(&self) -> Vec<Opportunity> {
        let (valid, stats) = self.evaluate(&self.config);
        let mut state = self.lock();
        for opp in &valid {
            if state.history.len() == OPPORTUNITY_HISTORY_CAPACITY {
                state.history.pop_front();
            }
            state.history.push_back(opp.clone());
        }
        state.latest = valid.clone();
        state.stats = stats;
        valid
    }

    /// Rank a fresh snapshot under `config`. The recorded ranking is left untouched, so
    /// callers with their own strategy parameters keep their results to themselves.
    pub fn scan_with(&self, config: &ScannerConfig) -> Vec<Opportunity> {
        self.evaluate(config).0
    }

    fn evaluate(&self, config: &ScannerConfig) -> (Vec<Opportunity>, ScanStats) {
        let snapshot = self.cache.snapshot();
        let candidates = enumerate_candidates(&snapshot, config);

        let mut invalid = 0usize;
        let mut valid = Vec::new();
        for candidate in &candidates {
            match evaluate_path(&snapshot, &candidate.symbols, &candidate.start_asset, config) {
                Ok(opp) if meets_threshold(&opp, config) => valid.push(opp),
                Ok(_) => invalid += 1,
                Err(e) => {
                    invalid += 1;
                    debug!(path = ?candidate.symbols, error = %e, "[SCAN] path discarded");
                }
            }
        }
        rank(&mut valid);

        let stats = summarize(candidates.len(), invalid, &valid);
        if valid.is_empty() {
            debug!(candidates = stats.candidates, "[SCAN] no opportunity above threshold");
        } else {
            info!(
                candidates = stats.candidates,
                valid = stats.valid,
                best_pct = stats.max_profit_percentage,
                "[SCAN] opportunities found"
            );
        }

        (valid, stats)
    }

    /// Evaluate one explicit path; below-threshold paths are reported as invalid.
    pub fn calculate_path(&self, path: &[String], start_asset: &str) -> Result<Opportunity> {
        let snapshot = self.cache.snapshot();
        let opp = evaluate_path(&snapshot, path, start_asset, &self.config)?;
        if !meets_threshold(&opp, &self.config) {
            return Err(AppError::Validation(format!(
                "profit {:.4}% below minimum {:.4}%",
                opp.profit_percentage, self.config.min_profit_percentage
            )));
        }
        Ok(opp)
    }

    /// Ranked result of the most recent scan.
    pub fn get_opportunities(&self) -> Vec<Opportunity> {
        self.lock().latest.clone()
    }

    pub fn get_best_opportunity(&self) -> Option<Opportunity> {
        self.lock().latest.first().cloned()
    }

    pub fn clear_opportunities(&self) {
        let mut state = self.lock();
        state.latest.clear();
        state.history.clear();
    }

    /// Every valid opportunity seen, oldest first, bounded.
    pub fn history(&self) -> Vec<Opportunity> {
        self.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> ScanStats {
        self.lock().stats.clone()
    }
}

/// Net profit descending, then faster execution, then lexical path.
pub fn rank(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(compare);
}

fn universe(snapshot: &CacheSnapshot, config: &ScannerConfig) -> Vec<String> {
    let mut symbols: Vec<String> = if config.symbols.is_empty() {
        snapshot.quotes.keys().cloned().collect()
    } else {
        config.symbols.clone()
    };
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Candidate paths for one scan, either as graph walks or brute-force permutations.
pub fn enumerate_candidates(
    snapshot: &CacheSnapshot,
    config: &ScannerConfig,
) -> Vec<PathCandidate> {
    let symbols = universe(snapshot, config);
    let brute_force = match config.method {
        ScanMethod::BruteForce => true,
        ScanMethod::Graph => false,
        ScanMethod::Auto => symbols.len() <= config.brute_force_max_symbols,
    };
    let candidates = if brute_force {
        brute_force_candidates(snapshot, &symbols, config)
    } else {
        graph_candidates(snapshot, &symbols, config)
    };
    debug!(
        universe = symbols.len(),
        brute_force,
        candidates = candidates.len(),
        "[SCAN] candidates enumerated"
    );
    candidates
}

fn graph_candidates(
    snapshot: &CacheSnapshot,
    symbols: &[String],
    config: &ScannerConfig,
) -> Vec<PathCandidate> {
    let metas: Vec<_> = symbols.iter().filter_map(|s| resolve_meta(snapshot, s)).collect();
    let graph = CurrencyGraph::from_metas(metas.iter());
    let starts = if config.start_assets.is_empty() {
        graph.assets()
    } else {
        config.start_assets.clone()
    };
    starts
        .iter()
        .flat_map(|start| graph.closed_walks(start, config.path_length, config.max_candidates))
        .collect()
}

/// Ordered symbol-distinct permutations; the evaluator discards the ones that do not close.
fn brute_force_candidates(
    snapshot: &CacheSnapshot,
    symbols: &[String],
    config: &ScannerConfig,
) -> Vec<PathCandidate> {
    let n = config.path_length;
    if n == 0 || n > symbols.len() {
        return Vec::new();
    }
    let limit = config.max_candidates;
    let mut out = Vec::new();
    let mut current: Vec<usize> = Vec::with_capacity(n);
    let mut used = vec![false; symbols.len()];
    let flow = permute(symbols.len(), n, &mut current, &mut used, &mut |perm| {
        let path: Vec<String> = perm.iter().map(|&i| symbols[i].clone()).collect();
        for start in start_assets_for(snapshot, &path[0], config) {
            if out.len() >= limit {
                return ControlFlow::Break(());
            }
            out.push(PathCandidate {
                start_asset: start,
                symbols: path.clone(),
            });
        }
        if out.len() >= limit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });
    if flow.is_break() {
        warn!(limit, "[SCAN] brute-force enumeration hit candidate ceiling");
    }
    out
}

fn permute(
    universe: usize,
    n: usize,
    current: &mut Vec<usize>,
    used: &mut [bool],
    emit: &mut dyn FnMut(&[usize]) -> ControlFlow<()>,
) -> ControlFlow<()> {
    if current.len() == n {
        return emit(current);
    }
    for i in 0..universe {
        if used[i] {
            continue;
        }
        used[i] = true;
        current.push(i);
        let flow = permute(universe, n, current, used, emit);
        current.pop();
        used[i] = false;
        flow?;
    }
    ControlFlow::Continue(())
}

fn start_assets_for(
    snapshot: &CacheSnapshot,
    first: &str,
    config: &ScannerConfig,
) -> BTreeSet<String> {
    let Some(meta) = resolve_meta(snapshot, first) else {
        return BTreeSet::new();
    };
    [meta.base_asset, meta.quote_asset]
        .into_iter()
        .filter(|a| config.start_assets.is_empty() || config.start_assets.contains(a))
        .collect()
}

fn summarize(candidates: usize, invalid: usize, valid: &[Opportunity]) -> ScanStats {
    let pcts: Vec<f64> = valid.iter().map(|o| o.profit_percentage).collect();
    let average = if pcts.is_empty() {
        0.0
    } else {
        pcts.iter().sum::<f64>() / pcts.len() as f64
    };
    ScanStats {
        candidates,
        invalid,
        valid: valid.len(),
        average_profit_percentage: average,
        max_profit_percentage: pcts.iter().copied().max_by(f64::total_cmp).unwrap_or(0.0),
        min_profit_percentage: pcts.iter().copied().min_by(f64::total_cmp).unwrap_or(0.0),
        scanned_at: Some(Utc::now()),
    }
}

/// Ranking order used by [`rank`]; the start asset settles otherwise identical paths.
pub fn compare(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.net_profit
        .total_cmp(&a.net_profit)
        .then_with(|| a.estimated_execution_ms.cmp(&b.estimated_execution_ms))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.start_asset.cmp(&b.start_asset))
}
