pub mod collect;

pub use collect::CollectConfig;
