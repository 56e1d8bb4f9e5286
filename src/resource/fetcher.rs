//! Resource Fetcher
//!
//! Enumerates a resource collection page by page.

use super::registry::ResourceDef;
use crate::cloud::CloudApi;
use crate::error::FetchError;
use serde_json::Value;
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Identity of a record as a string, if its id field holds a scalar
pub fn identity(record: &Value, id_field: &str) -> Option<String> {
    match record.get(id_field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Fetch all resources (auto-paginate)
///
/// Pages are requested sequentially, each with the cursor returned by the
/// previous one, and concatenated in request order. Any page failure aborts
/// the whole fetch. Cancellation is checked before every page request.
pub async fn fetch_all(
    api: &dyn CloudApi,
    resource: &ResourceDef,
    cancel: &CancellationToken,
) -> Result<Vec<Value>, FetchError> {
    let mut all_items = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            tracing::info!("Fetch of {} cancelled after {} pages", resource.key, pages);
            return Err(FetchError::Cancelled);
        }

        let page = api
            .list_page(resource, cursor.as_deref())
            .await
            .map_err(|source| FetchError::Remote {
                resource: resource.key.clone(),
                source,
            })?;
        pages += 1;

        for item in page.items.iter() {
            match identity(item, &resource.id_field) {
                Some(id) if seen.insert(id.clone()) => all_items.push(item.clone()),
                Some(id) => {
                    tracing::warn!("Dropping duplicate {} '{}'", resource.key, id);
                }
                None => {
                    tracing::warn!(
                        "Dropping {} record '{}' without '{}'",
                        resource.key,
                        resource.name_of(item).unwrap_or("?"),
                        resource.id_field
                    );
                }
            }
        }

        let Some(next) = page.next_cursor() else {
            break;
        };
        if cursor.as_deref() == Some(next) {
            tracing::warn!("{} list returned the same cursor twice, stopping", resource.key);
            break;
        }
        cursor = Some(next.to_string());
    }

    tracing::debug!(
        "Fetched {} {} records in {} pages",
        all_items.len(),
        resource.key,
        pages
    );
    Ok(all_items)
}
