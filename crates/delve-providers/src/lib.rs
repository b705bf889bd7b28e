mod completion;
mod search;

pub use completion::{
    CompletionProvider, CompletionRegistry, ProviderConfig, ProviderInfo, ProvidersConfig,
};
pub use search::{build_search_provider, SearchHit, SearchProvider, SearchSettings};
