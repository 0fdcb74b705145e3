//! External capabilities used by worker agents
//!
//! # Module Structure
//!
//! - [`search`](crate::tools::search) - Web search contract and the DuckDuckGo backend
//!
//! ## Web Search
//! ```ignore
//! let search = DuckDuckGoSearch::new();
//! for hit in search.search("rust programming", 5).await? {
//!     println!("{}: {}", hit.title, hit.url);
//! }
//! ```

/// Web search via DuckDuckGo.
pub mod search;

pub use search::{DuckDuckGoSearch, SearchHit, SearchProvider};
