pub mod api;
pub mod attachments;
pub mod config;
pub mod context;
pub mod crawl_log;
pub mod document;
pub mod download;
pub mod error;
pub mod ledger;
pub mod links;
pub mod logging;
pub mod offset_index;
pub mod publish;
pub mod rewrite;
pub mod runtime;
pub mod sanity;
pub mod tabular;
pub mod tree;
pub mod update;
