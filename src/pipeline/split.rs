//! Splitting: cut each page group out of the source as its own PDF.
//!
//! Pages are copied, never re-rendered. For every group the parsed source is
//! cloned, the pages outside the group are deleted from the page tree and the
//! objects nothing references any more are pruned, so the kept pages' content
//! streams, fonts and images reach the output byte for byte. Each group works
//! on its own clone: a group that fails to save leaves the others untouched.

use crate::error::SplitError;
use crate::output::{DeliverableDocument, PageGroup, SourceDocument};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::{debug, warn};

const MAX_NAME_CHARS: usize = 120;

/// Produce one deliverable (or one error) per group, in group order.
pub fn split_document(
    document: &SourceDocument,
    groups: &[PageGroup],
    unclassified_folder: &str,
) -> Vec<Result<DeliverableDocument, SplitError>> {
    let source = match lopdf::Document::load_mem(&document.bytes) {
        Ok(doc) => doc,
        Err(e) => {
            warn!("Cannot parse '{}' for splitting: {}", document.name, e);
            let detail = e.to_string();
            return groups
                .iter()
                .map(|_| Err(SplitError::Parse(detail.clone())))
                .collect();
        }
    };
    let page_numbers: Vec<u32> = source.get_pages().keys().copied().collect();

    groups
        .iter()
        .map(|group| split_group(&source, &page_numbers, group, unclassified_folder))
        .collect()
}

fn split_group(
    source: &lopdf::Document,
    page_numbers: &[u32],
    group: &PageGroup,
    unclassified_folder: &str,
) -> Result<DeliverableDocument, SplitError> {
    if group.pages.is_empty() {
        return Err(SplitError::EmptyGroup { group: group.index });
    }
    let total = page_numbers.len();
    if let Some(&page) = group.pages.iter().find(|&&p| p == 0 || p > total) {
        return Err(SplitError::PageOutOfRange {
            group: group.index,
            page,
            total,
        });
    }

    let keep: HashSet<u32> = group.pages.iter().map(|&p| p as u32).collect();
    let remove: Vec<u32> = page_numbers
        .iter()
        .copied()
        .filter(|p| !keep.contains(p))
        .collect();

    let mut doc = source.clone();
    doc.delete_pages(&remove);
    doc.prune_objects();

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).map_err(|e| SplitError::Save {
        group: group.index,
        detail: e.to_string(),
    })?;

    let file_name = file_name_for(group);
    debug!(
        "Group {}: pages {}-{} → '{}' ({} bytes)",
        group.index,
        group.first_page(),
        group.last_page(),
        file_name,
        bytes.len()
    );

    Ok(DeliverableDocument {
        group_index: group.index,
        pages: group.pages.clone(),
        file_name,
        folder_name: folder_name_for(group, unclassified_folder),
        bytes,
    })
}

/// Destination file name for a group.
pub fn file_name_for(group: &PageGroup) -> String {
    let invoice = group.representative.invoice_no.as_deref().map(sanitize_name);
    let ship_to = group.representative.ship_to.as_deref().map(sanitize_name);
    let range = if group.first_page() == group.last_page() {
        format!("page {}", group.first_page())
    } else {
        format!("pages {}-{}", group.first_page(), group.last_page())
    };

    let stem = match (invoice, ship_to) {
        (Some(inv), Some(to)) if !inv.is_empty() && !to.is_empty() => format!("{inv} - {to}"),
        (Some(inv), _) if !inv.is_empty() => inv,
        (_, Some(to)) if !to.is_empty() => format!("{to} ({range})"),
        _ => format!("Unidentified ({range})"),
    };
    format!("{stem}.pdf")
}

/// Destination folder name for a group: its ship-to client, else the fallback.
pub fn folder_name_for(group: &PageGroup, unclassified_folder: &str) -> String {
    group
        .representative
        .ship_to
        .as_deref()
        .map(sanitize_name)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| unclassified_folder.to_string())
}

static RE_UNSAFE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[/\\:*?"<>|\x00-\x1F]"#).unwrap());

/// Make a model-provided string safe as a file or folder name.
pub fn sanitize_name(raw: &str) -> String {
    let replaced = RE_UNSAFE.replace_all(raw, "-");
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_NAME_CHARS).collect();
    capped.trim_end_matches(['.', ' ']).to_string()
}
