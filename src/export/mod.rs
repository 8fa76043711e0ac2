pub mod cache_index;
pub mod config;
pub mod fetch;
pub mod identity;
pub mod index_page;
pub mod ledger;
pub mod lock;
pub mod model;
pub mod paths;
pub mod pipeline;
pub mod render_html;
pub mod render_text;
pub mod reports;
pub mod resolver;
pub mod source;
pub mod stats;
pub mod threads;
pub mod util;
pub mod warn;
pub mod workspace;
