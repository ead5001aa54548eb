/// Data layer: core types, table I/O, and cut evaluation.
///
/// Architecture:
/// ```text
///  .parquet / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  open → schema, read_all → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────────┐
///   │   Dataset     │  Arc<Schema>, Vec<EventRecord>, role, weight
///   └──────────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  apply predicate → counts / matching subset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  writer   │  Dataset → .parquet / .csv, scan curve → .csv
///   └──────────┘
/// ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod writer;
