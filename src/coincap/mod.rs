pub mod client;

pub use client::{AssetRecord, CoinCapClient, HistoryPoint};
