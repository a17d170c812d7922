// src/collect/registry.rs
use crate::collect::providers::{
    CellxGeneCollector, GenBankCollector, PdbCollector, SraCollector, UniProtCollector,
};
use crate::collect::Collector;
use crate::config::CollectConfig;

/// Registered source ids, in manifest order.
pub const SOURCE_IDS: [&str; 5] = ["sra", "cellxgene", "pdb", "genbank", "uniprot"];

pub fn all_collectors(cfg: &CollectConfig) -> Vec<Box<dyn Collector>> {
    vec![
        Box::new(SraCollector::new(cfg.sra.clone())),
        Box::new(CellxGeneCollector::new(cfg.cellxgene.clone())),
        Box::new(PdbCollector::new(cfg.pdb.clone())),
        Box::new(GenBankCollector::new(cfg.genbank.clone())),
        Box::new(UniProtCollector::new(cfg.uniprot.clone())),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown source {0:?} (known: sra, cellxgene, pdb, genbank, uniprot)")]
pub struct UnknownSource(pub String);

/// Collectors for `only` (all when empty), kept in registry order.
pub fn select(cfg: &CollectConfig, only: &[String]) -> Result<Vec<Box<dyn Collector>>, UnknownSource> {
    if let Some(bad) = only.iter().find(|id| !SOURCE_IDS.contains(&id.as_str())) {
        return Err(UnknownSource(bad.clone()));
    }
    Ok(all_collectors(cfg)
        .into_iter()
        .filter(|c| only.is_empty() || only.iter().any(|id| *id == c.source_id()))
        .collect())
}
