// src/collect/providers/mod.rs
pub mod cellxgene;
pub mod genbank;
pub mod pdb;
pub mod sra;
pub mod uniprot;

pub use cellxgene::CellxGeneCollector;
pub use genbank::GenBankCollector;
pub use pdb::PdbCollector;
pub use sra::SraCollector;
pub use uniprot::UniProtCollector;
