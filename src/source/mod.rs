pub mod fetcher;
pub mod parser;

pub use fetcher::MarketplaceListingSource;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{ListingEntry, ListingType};

/// Supplies the ranked entries of one category view.
///
/// Implementations raise on transport failure and return an empty list when the
/// page yields nothing parseable. Any request pacing is their own concern.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(
        &self,
        category_external_id: &str,
        listing_type: ListingType,
        cancel: &CancellationToken,
    ) -> Result<Vec<ListingEntry>>;
}
