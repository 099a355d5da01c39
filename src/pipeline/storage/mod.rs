// Pipeline storage: delimited-text artifacts shared between stages

pub mod artifacts;

pub use artifacts::{
    read_joined, read_ledger, read_registry, write_aggregates, write_joined, write_ledger,
    zip_artifact,
};
