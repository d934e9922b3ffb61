//! Fuzzy destination resolution for moves
//!
//! A free-text description is sent to the provider's relevance search and the
//! first folder in the returned order wins. No local scoring happens, so the
//! outcome is exactly as stable as the provider's ranking. Finding nothing is
//! an ordinary outcome ([`Resolution::NoMatch`]), not an error.

use serde::Serialize;

use crate::errors::AppResult;
use crate::graph::ResourceProvider;
use crate::models::DriveItemInfo;

/// Number of search hits inspected for folders
const SEARCH_TOP: usize = 25;
/// Error text returned when no folder matches
pub const NO_MATCH_ERROR: &str = "No matching folders found";

/// Chosen destination folder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Destination {
    pub id: String,
    pub name: String,
    /// Full drive path of the folder
    pub path: String,
}

impl Destination {
    fn from_folder(folder: DriveItemInfo) -> Self {
        let path = match folder.parent_path.as_deref() {
            Some(parent) => format!("{}/{}", parent.trim_end_matches('/'), folder.name),
            None => folder.name.clone(),
        };
        Self {
            id: folder.id,
            name: folder.name,
            path,
        }
    }
}

/// Outcome of a move request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resolution {
    /// Item was moved into the resolved folder
    Moved {
        moved: DriveItemInfo,
        destination: Destination,
    },
    /// No folder matched; nothing was moved
    NoMatch {
        error: String,
        query: String,
        suggestion: String,
    },
}

/// Resolve `query` to a folder without moving anything
///
/// # Errors
///
/// Propagates search failures from the provider.
pub async fn resolve_destination(
    provider: &dyn ResourceProvider,
    query: &str,
) -> AppResult<Option<Destination>> {
    let hits = provider.search_items(query, SEARCH_TOP).await?;
    Ok(hits
        .into_iter()
        .find(|item| item.is_folder)
        .map(Destination::from_folder))
}

/// Resolve the destination and move the item there
///
/// # Errors
///
/// Propagates search and move failures from the provider. A query with no
/// matching folder is returned as [`Resolution::NoMatch`].
pub async fn move_to_described_folder(
    provider: &dyn ResourceProvider,
    item_id: &str,
    query: &str,
    new_name: Option<&str>,
) -> AppResult<Resolution> {
    let Some(destination) = resolve_destination(provider, query).await? else {
        tracing::info!(%query, "no folder matched move destination");
        return Ok(Resolution::NoMatch {
            error: NO_MATCH_ERROR.to_owned(),
            query: query.to_owned(),
            suggestion: "Try a shorter or different folder name, or use search_files to find the folder first".to_owned(),
        });
    };

    tracing::info!(destination = %destination.path, "resolved move destination");
    let moved = provider
        .move_item(item_id, &destination.id, new_name)
        .await?;
    Ok(Resolution::Moved { moved, destination })
}
