pub mod search;

pub use search::{ConfiguredSearchClient, WebSearchClient};
