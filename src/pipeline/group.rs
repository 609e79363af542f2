//! Grouping: partition the ordered page metadata into contiguous documents.
//!
//! Page 1 always opens the first group. After that a page opens a new group
//! only when it carries an invoice number that differs from the current
//! group's; a page with no invoice number (continuation sheet, annex,
//! unreadable scan) stays with the document before it. Only contiguous runs
//! are considered: an invoice number that reappears after a different one
//! starts a fresh group rather than rejoining the earlier one.

use crate::output::{PageGroup, PageMetadata};

/// Partition `pages` into contiguous groups covering every page exactly once.
pub fn group_pages(pages: &[PageMetadata]) -> Vec<PageGroup> {
    let mut ordered: Vec<&PageMetadata> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_index);

    let mut groups: Vec<PageGroup> = Vec::new();
    for page in ordered {
        let starts_new = match groups.last() {
            None => true,
            Some(current) => match invoice_key(page) {
                Some(invoice) => invoice_key(&current.representative) != Some(invoice),
                None => false,
            },
        };

        if starts_new {
            groups.push(PageGroup {
                index: groups.len() + 1,
                pages: vec![page.page_index],
                representative: page.clone(),
            });
            continue;
        }

        if let Some(current) = groups.last_mut() {
            current.pages.push(page.page_index);
            if current.representative.ship_to.is_none() && page.ship_to.is_some() {
                current.representative.ship_to = page.ship_to.clone();
            }
        }
    }

    groups
}

fn invoice_key(meta: &PageMetadata) -> Option<&str> {
    meta.invoice_no
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
}
