pub mod arena_http;
pub mod jsonl;
pub mod postgres;
pub mod traits;

pub use arena_http::ArenaClient;
pub use jsonl::JsonlRecordSource;
pub use postgres::PostgresRecordSource;
pub use traits::{
    BankrollSource, LiveFeed, MatchMeta, PotAverage, RecordBatch, RecordSource, WagerSubmitter,
};
