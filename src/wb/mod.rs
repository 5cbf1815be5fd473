pub mod cache;
pub mod client;

pub use cache::BalanceCache;
pub use client::{Balance, PingReport, Probe, SellerInfo, WbClient, WbError};
