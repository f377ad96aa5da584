use crate::models::{Side, SymbolMeta};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// A directed conversion between two assets through one trading pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairEdge {
    pub symbol: String,
    /// SELL for base→quote, BUY for quote→base.
    pub side: Side,
}

/// Closed walk found by the search: start asset plus the symbols visited in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathCandidate {
    pub start_asset: String,
    pub symbols: Vec<String>,
}

#[derive(Debug)]
struct WalkState {
    node: NodeIndex,
    symbols: Vec<String>,
    assets: Vec<NodeIndex>,
}

/// Assets as nodes, each tradeable pair contributing one edge per direction.
#[derive(Debug, Clone, Default)]
pub struct CurrencyGraph {
    graph: DiGraph<String, PairEdge>,
    asset_index: HashMap<String, NodeIndex>,
}

impl CurrencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_metas<'a, I>(metas: I) -> Self
    where
        I: IntoIterator<Item = &'a SymbolMeta>,
    {
        let mut graph = Self::new();
        for meta in metas {
            graph.add_pair(meta);
        }
        graph
    }

    fn add_or_get_asset(&mut self, asset: &str) -> NodeIndex {
        if let Some(&idx) = self.asset_index.get(asset) {
            return idx;
        }
        let idx = self.graph.add_node(asset.to_string());
        self.asset_index.insert(asset.to_string(), idx);
        idx
    }

    pub fn add_pair(&mut self, meta: &SymbolMeta) {
        if meta.base_asset == meta.quote_asset {
            warn!(symbol = %meta.symbol, "[SCAN] pair with identical assets ignored");
            return;
        }
        let base = self.add_or_get_asset(&meta.base_asset);
        let quote = self.add_or_get_asset(&meta.quote_asset);
        self.graph.add_edge(
            base,
            quote,
            PairEdge {
                symbol: meta.symbol.clone(),
                side: Side::Sell,
            },
        );
        self.graph.add_edge(
            quote,
            base,
            PairEdge {
                symbol: meta.symbol.clone(),
                side: Side::Buy,
            },
        );
    }

    pub fn asset_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn pair_count(&self) -> usize {
        self.graph.edge_count() / 2
    }

    /// Assets in the graph, sorted.
    pub fn assets(&self) -> Vec<String> {
        let mut assets: Vec<String> = self.asset_index.keys().cloned().collect();
        assets.sort();
        assets
    }

    /// Every closed walk of exactly `length` legs that leaves `start` and returns to it.
    ///
    /// No pair is used twice and no intermediate asset is revisited. The search stops
    /// after `limit` expanded states.
    pub fn closed_walks(&self, start: &str, length: usize, limit: usize) -> Vec<PathCandidate> {
        let Some(&start_node) = self.asset_index.get(start) else {
            return Vec::new();
        };
        if length < 2 {
            return Vec::new();
        }

        let mut found = Vec::new();
        let mut stack = vec![WalkState {
            node: start_node,
            symbols: Vec::with_capacity(length),
            assets: vec![start_node],
        }];
        let mut expanded = 0usize;

        while let Some(WalkState { node, symbols, assets }) = stack.pop() {
            if expanded >= limit {
                warn!(start, length, limit, "[SCAN] closed-walk search hit iteration ceiling");
                break;
            }
            expanded += 1;

            if symbols.len() == length {
                if node == start_node {
                    found.push(PathCandidate {
                        start_asset: start.to_string(),
                        symbols,
                    });
                }
                continue;
            }

            let closing = symbols.len() + 1 == length;
            for edge in self.graph.edges(node) {
                let target = edge.target();
                let pair = edge.weight();
                if symbols.contains(&pair.symbol) {
                    continue;
                }
                // Only the final leg may land on the start asset.
                if closing != (target == start_node) {
                    continue;
                }
                if !closing && assets.contains(&target) {
                    continue;
                }
                let mut next_symbols = symbols.clone();
                next_symbols.push(pair.symbol.clone());
                let mut next_assets = assets.clone();
                next_assets.push(target);
                stack.push(WalkState {
                    node: target,
                    symbols: next_symbols,
                    assets: next_assets,
                });
            }
        }

        found.sort();
        debug!(start, length, expanded, found = found.len(), "[SCAN] closed walks enumerated");
        found
    }
}
